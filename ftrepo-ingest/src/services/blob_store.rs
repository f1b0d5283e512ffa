//! Artifact hosting for published packages

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob store I/O error for {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blob name: {0:?}")]
    InvalidName(String),

    #[error("Blob store rejected request: {0}")]
    Rejected(String),
}

/// Flat namespace of named packages
///
/// `upload` returns the public locator recorded as the entry's download
/// reference. `delete` of a missing name succeeds.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn list(&self) -> Result<BTreeSet<String>, BlobError>;

    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, BlobError>;

    async fn delete(&self, filename: &str) -> Result<(), BlobError>;
}

/// Reject names that could escape the flat namespace
pub fn validate_blob_name(filename: &str) -> Result<(), BlobError> {
    let bad = filename.trim().is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == "..";
    if bad {
        Err(BlobError::InvalidName(filename.to_string()))
    } else {
        Ok(())
    }
}

/// Public download URL for a package under `base_url`
pub fn public_url(base_url: &str, filename: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(filename)
    )
}

/// Packages stored as files in one directory that is served at `public_base_url`
pub struct DirectoryBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_error(name: &str, source: std::io::Error) -> BlobError {
        BlobError::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    async fn list(&self) -> Result<BTreeSet<String>, BlobError> {
        let mut names = BTreeSet::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Blob directory {} does not exist yet", self.root.display());
                return Ok(names);
            }
            Err(e) => return Err(Self::io_error(&self.root.display().to_string(), e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&self.root.display().to_string(), e))?
        {
            let is_file = item
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                // In-flight upload temp files are not blobs
                if !name.ends_with(".part") {
                    names.insert(name.to_string());
                }
            }
        }

        Ok(names)
    }

    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, BlobError> {
        validate_blob_name(filename)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Self::io_error(filename, e))?;

        let target = self.root.join(filename);
        let partial = self.root.join(format!("{}.part", filename));
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| Self::io_error(filename, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(Self::io_error(filename, e));
        }

        info!(filename = filename, bytes = bytes.len(), "Uploaded package");
        Ok(public_url(&self.public_base_url, filename))
    }

    async fn delete(&self, filename: &str) -> Result<(), BlobError> {
        validate_blob_name(filename)?;
        match tokio::fs::remove_file(self.root.join(filename)).await {
            Ok(()) => {
                info!(filename = filename, "Deleted package");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(filename = filename, "Package already absent");
                Ok(())
            }
            Err(e) => Err(Self::io_error(filename, e)),
        }
    }
}
