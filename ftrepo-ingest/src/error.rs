//! Run-level errors
//!
//! Per-item failures (download, inference, upload) never surface here; they
//! are tallied in the run report. These errors end a run.

use crate::services::blob_store::BlobError;
use crate::services::chat_source::SourceError;
use std::path::PathBuf;
use thiserror::Error;

/// A catalog, derived catalog, or cache document could not be read or written
#[derive(Debug, Error)]
#[error("Persistence failed for {}: {source}", .path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: ftrepo_common::Error,
}

/// Errors that abort an ingestion run
#[derive(Debug, Error)]
pub enum RunError {
    /// Blob store listing failed before any item was processed
    #[error("Blob store unavailable: {0}")]
    BlobStore(#[from] BlobError),

    /// Channel list could not be retrieved
    #[error("Chat source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Cancellation was requested; nothing was persisted
    #[error("Run cancelled before completion; catalog left unchanged")]
    Cancelled,
}
