//! Fingerprint cache: announcement text to validated metadata
//!
//! Only validated [`InferredMetadata`] is ever stored, so a cached value is
//! always safe to reuse without calling the inference service again.

use crate::error::PersistenceError;
use crate::models::InferredMetadata;
use ftrepo_common::json_store::{read_json, write_json_atomic};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct FingerprintCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, InferredMetadata>,
    dirty: bool,
}

impl FingerprintCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`
    ///
    /// A missing file starts an empty cache. An unreadable or malformed file
    /// is logged and replaced on the next flush; losing the cache only costs
    /// repeat inference calls.
    pub fn load(path: &Path) -> Self {
        let entries = match read_json::<BTreeMap<String, InferredMetadata>>(path) {
            Ok(Some(entries)) => {
                info!(
                    "Loaded {} cached extractions from {}",
                    entries.len(),
                    path.display()
                );
                entries
            }
            Ok(None) => {
                debug!("No fingerprint cache at {}; starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Discarding unreadable fingerprint cache: {}", e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path.to_path_buf()),
            entries,
            dirty: false,
        }
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<&InferredMetadata> {
        self.entries.get(fingerprint)
    }

    /// Record a validated result; an existing value for the fingerprint is replaced
    pub fn store(&mut self, fingerprint: &str, metadata: InferredMetadata) {
        self.entries.insert(fingerprint.to_string(), metadata);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the cache if it changed since load or the last flush
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            debug!("Fingerprint cache unchanged; not writing");
            return Ok(());
        }

        write_json_atomic(path, &self.entries).map_err(|source| PersistenceError {
            path: path.clone(),
            source,
        })?;
        self.dirty = false;
        debug!("Flushed {} cache entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}
