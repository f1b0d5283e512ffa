//! Data models for catalog ingest

pub mod catalog_document;
pub mod catalog_entry;
pub mod inferred_metadata;
pub mod run_report;
pub mod variant_registry;

pub use catalog_document::{AppRecord, AppVersion, CatalogDocument};
pub use catalog_entry::{CatalogEntry, SlotKey};
pub use inferred_metadata::InferredMetadata;
pub use run_report::{ItemOutcome, ItemReport, RunReport};
pub use variant_registry::VariantRegistry;
