//! Common error types for FTRepo

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Common result type for FTRepo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across FTRepo crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON document could not be parsed or serialized
    #[error("JSON error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A staged document could not be put in place
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// File the error refers to, when known
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::Json { path, .. } | Error::Write { path, .. } => Some(path),
            _ => None,
        }
    }
}
