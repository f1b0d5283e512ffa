//! Whole-document JSON persistence
//!
//! Documents are read fully and written fully. Writes go to a sibling
//! temporary file which is then renamed over the target, so readers never
//! observe a half-written document. Several documents can be staged and
//! committed together so that either all of them change or none do.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Read a JSON document; `Ok(None)` when the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document (pretty-printed, UTF-8 preserved) via temp file + rename
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    commit_all(vec![stage_json(path, value)?])
}

/// A serialized document waiting next to its target
///
/// Dropping an uncommitted write removes the temporary file.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: PathBuf,
    bytes: usize,
    committed: bool,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Serialize `value` into a temporary file beside `path`
///
/// Nothing at `path` changes until [`commit_all`]. A target that is a
/// directory is refused here, before anything is committed.
pub fn stage_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<StagedWrite> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');

    let write_error = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    if path.is_dir() {
        return Err(write_error(std::io::Error::new(
            std::io::ErrorKind::Other,
            "target is a directory",
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let temp = temp_path(path);
    std::fs::write(&temp, &bytes).map_err(write_error)?;
    Ok(StagedWrite {
        target: path.to_path_buf(),
        temp,
        bytes: bytes.len(),
        committed: false,
    })
}

/// Rename every staged write over its target, all or nothing
///
/// If any rename fails, targets already replaced get their previous content
/// back (or are removed when they did not exist) and the remaining temporary
/// files are deleted.
pub fn commit_all(staged: Vec<StagedWrite>) -> Result<()> {
    let mut replaced: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();

    for mut write in staged {
        let previous = match std::fs::read(&write.target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                restore(&replaced);
                return Err(Error::Write {
                    path: write.target.clone(),
                    source,
                });
            }
        };

        if let Err(source) = std::fs::rename(&write.temp, &write.target) {
            restore(&replaced);
            return Err(Error::Write {
                path: write.target.clone(),
                source,
            });
        }
        write.committed = true;
        tracing::debug!(path = %write.target.display(), bytes = write.bytes, "Wrote JSON document");
        replaced.push((write.target.clone(), previous));
    }
    Ok(())
}

/// Put back what `commit_all` replaced, newest first
fn restore(replaced: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, previous) in replaced.iter().rev() {
        let result = match previous {
            Some(bytes) => std::fs::write(path, bytes),
            None => std::fs::remove_file(path),
        };
        match result {
            Ok(()) => tracing::info!(path = %path.display(), "Restored document after failed write"),
            Err(e) => tracing::error!(path = %path.display(), "Could not restore document: {}", e),
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
