//! Chat sources announcing packages
//!
//! A source exposes channels; a channel may be split into topics. Each
//! channel or topic lists its most recent package attachments, newest first,
//! each with the announcement text posted alongside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Listing a channel or topic failed
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Channel {channel} unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    #[error("Source root unavailable: {0}")]
    RootUnavailable(String),
}

/// Downloading one attachment failed; only that item is affected
#[derive(Debug, Error)]
#[error("Failed to fetch {filename}: {reason}")]
pub struct TransientFetchError {
    pub filename: String,
    pub reason: String,
}

/// A channel or a topic within a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHandle {
    pub channel: String,
    pub topic: Option<String>,
    /// Source-specific address (directory path for [`DirectorySource`])
    pub locator: String,
}

impl SourceHandle {
    /// `"channel"` or `"channel/topic"`, for logs and reports
    pub fn label(&self) -> String {
        match &self.topic {
            Some(topic) => format!("{}/{}", self.channel, topic),
            None => self.channel.clone(),
        }
    }
}

/// One announced package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Announcement text; empty when nothing was posted with the file
    pub description: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    pub locator: String,
}

#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<SourceHandle>, SourceError>;

    /// Topics of a forum-style channel; empty for plain channels
    async fn list_topics(&self, _channel: &SourceHandle) -> Result<Vec<SourceHandle>, SourceError> {
        Ok(Vec::new())
    }

    /// Up to `limit` package attachments, newest first
    async fn list_attachments(
        &self,
        handle: &SourceHandle,
        limit: usize,
    ) -> Result<Vec<Attachment>, SourceError>;

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransientFetchError>;
}

const PACKAGE_EXTENSION: &str = "ipa";
const SIDECAR_SUFFIX: &str = ".txt";

/// Drop-folder source
///
/// Layout: `<root>/<channel>/<file>.ipa`, announcement text in the sidecar
/// `<file>.ipa.txt`, posting time taken from the package's modification
/// time. Subdirectories of a channel are its topics.
pub struct DirectorySource {
    root: PathBuf,
    channels: Vec<String>,
}

impl DirectorySource {
    /// `channels` restricts scanning to the named channels; empty scans all
    pub fn new(root: impl Into<PathBuf>, channels: Vec<String>) -> Self {
        Self {
            root: root.into(),
            channels,
        }
    }

    fn subdirectories(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "not a directory",
            ));
        }
        let mut dirs = Vec::new();
        for item in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let item = item.map_err(std::io::Error::from)?;
            if item.file_type().is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    dirs.push((name.to_string(), item.path().to_path_buf()));
                }
            }
        }
        Ok(dirs)
    }

    fn is_package(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(PACKAGE_EXTENSION))
            .unwrap_or(false)
    }

    fn read_sidecar(package: &Path) -> String {
        let mut sidecar = package.as_os_str().to_os_string();
        sidecar.push(SIDECAR_SUFFIX);
        match std::fs::read_to_string(&sidecar) {
            Ok(text) => text.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!("Unreadable announcement for {}: {}", package.display(), e);
                String::new()
            }
        }
    }

    /// Packages directly inside `dir`, newest first, at most `limit`
    fn scan_packages(dir: &Path, label: &str, limit: usize) -> Result<Vec<Attachment>, String> {
        if !dir.is_dir() {
            return Err("not a directory".to_string());
        }

        let mut packages = Vec::new();
        for item in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let item = item.map_err(|e| e.to_string())?;
            if !item.file_type().is_file() || !Self::is_package(item.path()) {
                continue;
            }
            let Some(filename) = item.file_name().to_str() else {
                debug!("Skipping non-UTF-8 filename in {}", label);
                continue;
            };
            let metadata = item.metadata().map_err(|e| e.to_string())?;
            let posted_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            packages.push((filename.to_string(), item.path().to_path_buf(), posted_at, metadata.len()));
        }

        // Newest first; name breaks ties so listings are stable
        packages.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        packages.truncate(limit);

        Ok(packages
            .into_iter()
            .map(|(filename, path, posted_at, size)| Attachment {
                description: Self::read_sidecar(&path),
                filename,
                posted_at,
                size: Some(size),
                locator: path.display().to_string(),
            })
            .collect())
    }
}

/// Run a directory scan on the blocking pool
async fn blocking<T, F>(scan: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(scan)
        .await
        .map_err(|e| format!("directory scan panicked: {}", e))?
}

#[async_trait]
impl ChatSource for DirectorySource {
    async fn list_channels(&self) -> Result<Vec<SourceHandle>, SourceError> {
        let root = self.root.clone();
        let found = blocking(move || Self::subdirectories(&root).map_err(|e| e.to_string()))
            .await
            .map_err(|e| SourceError::RootUnavailable(format!("{}: {}", self.root.display(), e)))?;

        let wanted = |name: &str| self.channels.is_empty() || self.channels.iter().any(|c| c == name);
        for configured in &self.channels {
            if !found.iter().any(|(name, _)| name == configured) {
                warn!("Configured channel {} not found under {}", configured, self.root.display());
            }
        }

        Ok(found
            .into_iter()
            .filter(|(name, _)| wanted(name))
            .map(|(name, path)| SourceHandle {
                channel: name,
                topic: None,
                locator: path.display().to_string(),
            })
            .collect())
    }

    async fn list_topics(&self, channel: &SourceHandle) -> Result<Vec<SourceHandle>, SourceError> {
        let dir = PathBuf::from(&channel.locator);
        let topics = blocking(move || Self::subdirectories(&dir).map_err(|e| e.to_string()))
            .await
            .map_err(|reason| SourceError::ChannelUnavailable {
                channel: channel.label(),
                reason,
            })?;

        Ok(topics
            .into_iter()
            .map(|(name, path)| SourceHandle {
                channel: channel.channel.clone(),
                topic: Some(name),
                locator: path.display().to_string(),
            })
            .collect())
    }

    async fn list_attachments(
        &self,
        handle: &SourceHandle,
        limit: usize,
    ) -> Result<Vec<Attachment>, SourceError> {
        let dir = PathBuf::from(&handle.locator);
        let label = handle.label();
        blocking(move || Self::scan_packages(&dir, &label, limit))
            .await
            .map_err(|reason| SourceError::ChannelUnavailable {
                channel: handle.label(),
                reason,
            })
    }


    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransientFetchError> {
        tokio::fs::read(&attachment.locator)
            .await
            .map_err(|e| TransientFetchError {
                filename: attachment.filename.clone(),
                reason: e.to_string(),
            })
    }
}
