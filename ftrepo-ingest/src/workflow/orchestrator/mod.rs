//! Ingestion run orchestrator
//!
//! # Phases
//! COLLECTING → DOWNLOADING → RESOLVING → PERSISTING
//!
//! - **COLLECTING**: list channels, topics and attachments; skip packages the
//!   blob store already holds
//! - **DOWNLOADING**: fetch queued packages with bounded concurrency, as a
//!   stream feeding RESOLVING
//! - **RESOLVING**: one item at a time, inspect the package, extract
//!   metadata, check the version against the catalog, upload, upsert
//! - **PERSISTING**: drop orphaned entries, write the primary and derived
//!   documents, flush the fingerprint and App Store caches, delete
//!   superseded packages
//!
//! Item-level failures are recorded and never stop sibling items. A run that
//! fails or is cancelled before both documents are written leaves the
//! catalog untouched and removes the packages it uploaded.

mod phase_collecting;
mod phase_downloading;
mod phase_persisting;
mod phase_resolving;

use crate::error::RunError;
use crate::models::{ItemOutcome, ItemReport, RunReport, VariantRegistry};
use crate::services::app_store::IconResolver;
use crate::services::blob_store::BlobStore;
use crate::services::chat_source::{Attachment, ChatSource, SourceHandle, TransientFetchError};
use crate::services::metadata_extractor::MetadataExtractor;
use crate::workflow::persistence::{CatalogFiles, LoadedCatalog};
use crate::workflow::statistics::{OutcomeTally, ScanStats};
use chrono::{DateTime, Utc};
use ftrepo_common::config::TomlConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-run limits and corrections
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Attachments listed per channel or topic
    pub max_items_per_source: usize,
    /// Concurrent downloads
    pub max_concurrent_downloads: usize,
    /// Display-name corrections keyed by bundle identifier
    pub name_overrides: BTreeMap<String, String>,
}

impl IngestOptions {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            max_items_per_source: config.source.max_items_per_source,
            max_concurrent_downloads: config.source.max_concurrent_downloads,
            name_overrides: config.name_overrides.clone(),
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Attachment queued for download
#[derive(Debug, Clone)]
struct PendingItem {
    handle: SourceHandle,
    attachment: Attachment,
}

/// Attachment after its download attempt
struct FetchedItem {
    item: PendingItem,
    result: Result<Vec<u8>, TransientFetchError>,
}

/// Mutable bookkeeping for one run
struct RunState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    /// Package names in the blob store, kept current as uploads happen
    listing: BTreeSet<String>,
    scan: ScanStats,
    tally: OutcomeTally,
    items: Vec<ItemReport>,
    /// Packages uploaded by this run
    uploaded: Vec<String>,
    /// Packages of replaced entries, deleted once the catalog is written
    superseded: Vec<String>,
    /// Both documents written; uploads can no longer be rolled back
    committed: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            listing: BTreeSet::new(),
            scan: ScanStats::default(),
            tally: OutcomeTally::default(),
            items: Vec::new(),
            uploaded: Vec::new(),
            superseded: Vec::new(),
            committed: false,
        }
    }

    fn record(&mut self, source: &str, filename: &str, outcome: ItemOutcome, detail: Option<String>) {
        self.tally.record(outcome);
        self.items.push(ItemReport {
            source: source.to_string(),
            filename: filename.to_string(),
            outcome,
            detail,
        });
    }
}

/// Runs one ingestion pass over all configured channels
pub struct IngestOrchestrator {
    source: Arc<dyn ChatSource>,
    blob_store: Arc<dyn BlobStore>,
    extractor: MetadataExtractor,
    registry: VariantRegistry,
    catalog: LoadedCatalog,
    files: CatalogFiles,
    options: IngestOptions,
    /// Icon lookup for entries that have none; disabled when absent
    icon_resolver: Option<IconResolver>,
}

impl IngestOrchestrator {
    pub fn new(
        source: Arc<dyn ChatSource>,
        blob_store: Arc<dyn BlobStore>,
        extractor: MetadataExtractor,
        registry: VariantRegistry,
        catalog: LoadedCatalog,
        files: CatalogFiles,
        options: IngestOptions,
    ) -> Self {
        Self {
            source,
            blob_store,
            extractor,
            registry,
            catalog,
            files,
            options,
            icon_resolver: None,
        }
    }

    pub fn with_icon_resolver(mut self, resolver: IconResolver) -> Self {
        self.icon_resolver = Some(resolver);
        self
    }

    /// Execute the run
    ///
    /// Returns the report on success. `RunError::Cancelled` and persistence
    /// failures leave every document unchanged.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunReport, RunError> {
        let mut state = RunState::new();
        info!(
            run_id = %state.run_id,
            catalog_entries = self.catalog.store.len(),
            "Ingestion run starting"
        );

        match self.run_phases(&mut state, &cancel).await {
            Ok(report) => {
                info!(
                    run_id = %report.run_id,
                    duration_secs = report.duration_secs(),
                    "Ingestion run complete: {}",
                    report.tally.display_string()
                );
                Ok(report)
            }
            Err(e) => {
                warn!(run_id = %state.run_id, "Ingestion run aborted: {}", e);
                if !state.committed {
                    self.roll_back_uploads(&state).await;
                }
                Err(e)
            }
        }
    }

    async fn run_phases(
        &mut self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        let pending = self.phase_collecting(state, cancel).await?;
        let downloads = self.phase_downloading(state, pending);
        self.phase_resolving(state, downloads, cancel).await?;
        self.phase_persisting(state, cancel).await
    }

    async fn roll_back_uploads(&self, state: &RunState) {
        for filename in &state.uploaded {
            if let Err(e) = self.blob_store.delete(filename).await {
                warn!(filename = %filename, "Failed to remove package uploaded by aborted run: {}", e);
            }
        }
        if !state.uploaded.is_empty() {
            info!(
                run_id = %state.run_id,
                removed = state.uploaded.len(),
                "Removed packages uploaded by aborted run"
            );
        }
    }
}
