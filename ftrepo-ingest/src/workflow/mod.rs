//! Ingestion workflow: orchestration, persistence, statistics

pub mod orchestrator;
pub mod persistence;
pub mod statistics;

pub use orchestrator::{IngestOptions, IngestOrchestrator};
pub use persistence::{CatalogFiles, LoadedCatalog};
pub use statistics::{OutcomeTally, ScanStats};
