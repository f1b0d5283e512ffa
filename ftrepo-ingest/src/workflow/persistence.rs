//! Catalog document loading and writing

use crate::error::PersistenceError;
use crate::models::{AppRecord, CatalogDocument, CatalogEntry};
use crate::services::catalog_store::CatalogStore;
use crate::services::identifier_deriver::DerivedCatalog;
use ftrepo_common::json_store::{commit_all, read_json, stage_json, write_json_atomic};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the run writes its documents
#[derive(Debug, Clone)]
pub struct CatalogFiles {
    pub primary: PathBuf,
    pub derived: PathBuf,
}

/// Catalog entries plus the document header they were loaded with
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub store: CatalogStore,
    /// Document name, identifier and unknown top-level fields; `apps` is empty
    pub header: CatalogDocument,
}

/// Load the primary catalog document into a store
///
/// A missing document starts an empty catalog with the given name and
/// identifier. A document that exists but cannot be parsed is an error: the
/// run must not overwrite a catalog it could not read.
pub fn load_catalog(
    path: &Path,
    name: &str,
    identifier: &str,
) -> Result<LoadedCatalog, PersistenceError> {
    let document = read_json::<CatalogDocument>(path).map_err(|source| PersistenceError {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(document) = document else {
        info!("No catalog at {}; starting empty", path.display());
        return Ok(LoadedCatalog {
            store: CatalogStore::new(),
            header: CatalogDocument::new(name, identifier),
        });
    };

    let records = document.apps.len();
    let (store, dropped) = CatalogStore::from_entries(document.entries());
    if dropped > 0 {
        warn!(
            "{} catalog records shared a slot with a newer entry and were dropped",
            dropped
        );
    }
    info!(
        "Loaded {} catalog entries from {} ({} records)",
        store.len(),
        path.display(),
        records
    );

    Ok(LoadedCatalog {
        store,
        header: document.with_apps(Vec::new()),
    })
}

pub fn render_primary(header: &CatalogDocument, entries: &[CatalogEntry]) -> CatalogDocument {
    header.with_apps(entries.iter().map(AppRecord::from_entry).collect())
}

/// Derived document; always carries a `news` array
pub fn render_derived(header: &CatalogDocument, derived: &DerivedCatalog) -> CatalogDocument {
    let mut document = header.with_apps(
        derived
            .entries
            .iter()
            .map(|d| AppRecord::derived(&d.entry, &d.derived_key))
            .collect(),
    );
    document
        .extra
        .entry("news")
        .or_insert_with(|| Value::Array(Vec::new()));
    document
}

pub fn write_document(path: &Path, document: &CatalogDocument) -> Result<(), PersistenceError> {
    write_json_atomic(path, document).map_err(|source| PersistenceError {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote {} apps to {}", document.apps.len(), path.display());
    Ok(())
}

/// Write several documents so that either all of them change or none do
///
/// Every document is serialized beside its target first; targets are only
/// replaced once all of them staged cleanly.
pub fn write_documents(documents: &[(&Path, &CatalogDocument)]) -> Result<(), PersistenceError> {
    let mut staged = Vec::with_capacity(documents.len());
    for (path, document) in documents {
        let write = stage_json(path, document).map_err(|source| PersistenceError {
            path: path.to_path_buf(),
            source,
        })?;
        staged.push(write);
    }

    commit_all(staged).map_err(|source| PersistenceError {
        path: source
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
        source,
    })?;

    for (path, document) in documents {
        info!("Wrote {} apps to {}", document.apps.len(), path.display());
    }
    Ok(())
}
