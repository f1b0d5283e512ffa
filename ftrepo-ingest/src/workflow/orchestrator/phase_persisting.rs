//! Phase 4: PERSISTING
//!
//! Orphan verification, document writes, cache flush, cleanup of replaced
//! packages
//!
//! Both documents are committed together: if either cannot be written, the
//! other keeps its previous content and the run's uploads are rolled back.

use super::{IngestOrchestrator, RunState};
use crate::error::RunError;
use crate::models::RunReport;
use crate::services::identifier_deriver;
use crate::workflow::persistence::{render_derived, render_primary, write_documents};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl IngestOrchestrator {
    /// Phase 4: PERSISTING - Write everything the run produced
    pub(super) async fn phase_persisting(
        &mut self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        info!(run_id = %state.run_id, "Phase 4: PERSISTING");

        self.drop_orphans(state).await;

        let exported = self.catalog.store.export();
        let derived = identifier_deriver::derive(&exported, &self.registry);

        let primary = render_primary(&self.catalog.header, &exported);
        let derived_doc = render_derived(&self.catalog.header, &derived);

        write_documents(&[
            (self.files.primary.as_path(), &primary),
            (self.files.derived.as_path(), &derived_doc),
        ])?;
        state.committed = true;

        if let Err(e) = self.extractor.flush_cache() {
            warn!("Fingerprint cache not saved: {}", e);
        }
        if let Some(resolver) = self.icon_resolver.as_mut() {
            let stats = resolver.stats();
            info!(
                searches = stats.searches,
                found = stats.found,
                cache_hits = stats.cache_hits,
                failures = stats.failures,
                "App Store icon lookups"
            );
            if let Err(e) = resolver.flush_cache() {
                warn!("App Store cache not saved: {}", e);
            }
        }

        for blob_name in std::mem::take(&mut state.superseded) {
            if exported.iter().any(|entry| entry.blob_name == blob_name) {
                continue;
            }
            if let Err(e) = self.blob_store.delete(&blob_name).await {
                warn!(filename = %blob_name, "Failed to delete replaced package: {}", e);
            }
        }

        Ok(RunReport {
            run_id: state.run_id,
            started_at: state.started_at,
            finished_at: Utc::now(),
            scan: state.scan.clone(),
            tally: state.tally.clone(),
            extractor: self.extractor.stats().clone(),
            items: std::mem::take(&mut state.items),
            conflicts: derived.conflicts,
            catalog_size: exported.len(),
            derived_size: derived.entries.len(),
        })
    }

    /// Remove entries whose package is no longer in the blob store
    ///
    /// Skipped when the listing fails, and when it comes back empty while
    /// the catalog is not: that points at a misconfigured store rather than
    /// every package vanishing at once.
    async fn drop_orphans(&mut self, state: &mut RunState) {
        let present = match self.blob_store.list().await {
            Ok(present) => present,
            Err(e) => {
                warn!("Skipping orphan verification: {}", e);
                return;
            }
        };

        if present.is_empty() && !self.catalog.store.is_empty() {
            warn!(
                entries = self.catalog.store.len(),
                "Blob store is empty; skipping orphan verification"
            );
            return;
        }

        let removed = self
            .catalog
            .store
            .retain(|entry| present.contains(&entry.blob_name));
        for entry in &removed {
            warn!(
                name = %entry.full_name(),
                filename = %entry.blob_name,
                "Dropping catalog entry whose package is missing"
            );
        }
        state.tally.orphaned = removed.len();
    }
}
