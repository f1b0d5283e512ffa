//! Service modules for catalog ingest

pub mod app_store;
pub mod blob_store;
pub mod catalog_store;
pub mod chat_source;
pub mod fingerprint_cache;
pub mod identifier_deriver;
pub mod inference_client;
pub mod metadata_extractor;
pub mod package_inspector;
pub mod version;

pub use app_store::{AppStoreError, AppStoreSearch, IconResolver, ListingCache, StoreListing};
pub use blob_store::{BlobError, BlobStore, DirectoryBlobStore};
pub use catalog_store::{CatalogStore, UpsertOutcome, UpsertReason};
pub use chat_source::{Attachment, ChatSource, DirectorySource, SourceError, SourceHandle, TransientFetchError};
pub use fingerprint_cache::FingerprintCache;
pub use identifier_deriver::{DerivationConflict, DerivedCatalog, DerivedEntry};
pub use inference_client::{
    HttpInferenceBackend, InferenceBackend, InferenceError, OpenRouterBackend, RateLimiter, RawInference,
};
pub use metadata_extractor::{ExtractionError, ExtractorStats, MetadataExtractor};
pub use package_inspector::{inspect_package, InspectError, PackageInfo};
