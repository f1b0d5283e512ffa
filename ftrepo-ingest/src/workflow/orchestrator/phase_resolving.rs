//! Phase 3: RESOLVING
//!
//! Package inspection, metadata extraction, version check, upload and
//! catalog upsert, one item at a time

use super::{FetchedItem, IngestOrchestrator, PendingItem, RunState};
use crate::error::RunError;
use crate::models::{CatalogEntry, InferredMetadata, ItemOutcome};
use crate::services::chat_source::{Attachment, SourceHandle};
use crate::services::metadata_extractor::MetadataExtractor;
use crate::services::package_inspector::{inspect_package, PackageInfo};
use chrono::Utc;
use std::sync::Arc;
use futures::{pin_mut, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Published description: source header, rule, then the cleaned text
pub fn compose_description(channel: &str, cleaned: &str) -> String {
    let header = format!("from @{} |", channel);
    let rule = "-".repeat(header.chars().count());
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        format!("{}\n{}", header, rule)
    } else {
        format!("{}\n{}\n{}", header, rule, cleaned)
    }
}

impl IngestOrchestrator {
    /// Phase 3: RESOLVING - Turn downloaded packages into catalog entries
    ///
    /// Items are resolved as they come off the download stream; each
    /// package is released before the next one is taken.
    pub(super) async fn phase_resolving(
        &mut self,
        state: &mut RunState,
        downloads: impl Stream<Item = FetchedItem>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        info!(run_id = %state.run_id, "Phase 3: RESOLVING");
        pin_mut!(downloads);

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                next = downloads.next() => match next {
                    Some(fetched) => fetched,
                    None => return Ok(()),
                },
            };
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            self.resolve_item(state, fetched).await;
        }
    }

    async fn resolve_item(&mut self, state: &mut RunState, fetched: FetchedItem) {
        let FetchedItem {
            item: PendingItem { handle, attachment },
            result,
        } = fetched;
        let label = handle.label();
        let filename = attachment.filename.clone();

        let bytes = match result {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                state.record(&label, &filename, ItemOutcome::FetchFailed, Some(e.reason));
                return;
            }
        };
        let package = inspect(Arc::clone(&bytes), &filename).await;

        let metadata = match self
            .extractor
            .extract(&attachment.description, &attachment.filename)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(source = %label, "{}", e);
                state.record(&label, &filename, ItemOutcome::ExtractionFailed, Some(e.summary));
                return;
            }
        };

        let candidate = self.build_entry(&handle, &attachment, metadata, package.as_ref(), bytes.len());
        let reason = self.catalog.store.evaluate(&candidate);
        if !reason.is_applied() {
            let current = self
                .catalog
                .store
                .get(&candidate.key, candidate.variant_label.as_deref())
                .map(|e| e.version.clone())
                .unwrap_or_default();
            debug!(
                slot = %candidate.slot(),
                candidate = %candidate.version,
                current = %current,
                "Catalog already has this version or newer"
            );
            state.record(
                &label,
                &filename,
                ItemOutcome::RejectedStale,
                Some(format!("{} <= {}", candidate.version, current)),
            );
            return;
        }

        let download_ref = match self.blob_store.upload(&filename, &bytes).await {
            Ok(download_ref) => download_ref,
            Err(e) => {
                warn!(source = %label, filename = %filename, "Upload failed: {}", e);
                state.record(&label, &filename, ItemOutcome::UploadFailed, Some(e.to_string()));
                return;
            }
        };
        state.uploaded.push(filename.clone());
        state.listing.insert(filename.clone());

        let mut entry = CatalogEntry {
            download_ref,
            ..candidate
        };
        if entry.icon_url.is_none() {
            if let Some(resolver) = self.icon_resolver.as_mut() {
                entry.icon_url = resolver.icon_for(&entry.key, &entry.display_name).await;
            }
        }
        let full_name = entry.full_name();
        let version = entry.version.clone();
        let outcome = self.catalog.store.upsert(entry);
        debug_assert!(outcome.applied, "evaluate and upsert disagree");

        if let Some(replaced) = outcome.replaced {
            info!(
                name = %full_name,
                from = %replaced.version,
                to = %version,
                "Replacing catalog entry"
            );
            if replaced.blob_name != filename {
                state.superseded.push(replaced.blob_name);
            }
        } else {
            info!(name = %full_name, version = %version, "Adding catalog entry");
        }

        state.record(&label, &filename, ItemOutcome::Applied(outcome.reason), Some(version));
    }

    fn build_entry(
        &self,
        handle: &SourceHandle,
        attachment: &Attachment,
        metadata: InferredMetadata,
        package: Option<&PackageInfo>,
        size: usize,
    ) -> CatalogEntry {
        let display_name = self
            .options
            .name_overrides
            .get(&metadata.resolved_key)
            .cloned()
            .unwrap_or(metadata.app_name);

        let variant_label = metadata.variant_label.map(|label| {
            self.registry
                .canonical(&label)
                .map(str::to_string)
                .unwrap_or(label)
        });

        if let Some(bundle_id) = package.and_then(|p| p.bundle_id.as_deref()) {
            if !bundle_id.eq_ignore_ascii_case(&metadata.resolved_key) {
                info!(
                    filename = %attachment.filename,
                    package = %bundle_id,
                    inferred = %metadata.resolved_key,
                    "Package bundle identifier differs from the inferred one; keeping the inferred one"
                );
            }
        }

        // Fields the run does not produce carry over from the slot's entry
        let existing = self
            .catalog
            .store
            .get(&metadata.resolved_key, variant_label.as_deref());
        let icon_url = existing.and_then(|e| e.icon_url.clone());
        let extra = existing.map(|e| e.extra.clone()).unwrap_or_default();
        let min_os_version = package
            .and_then(|p| p.min_os_version.clone())
            .or_else(|| existing.and_then(|e| e.min_os_version.clone()));

        CatalogEntry {
            key: metadata.resolved_key,
            display_name,
            version: metadata.version,
            variant_label,
            download_ref: String::new(),
            source_fingerprint: MetadataExtractor::fingerprint(
                &attachment.description,
                &attachment.filename,
            ),
            blob_name: attachment.filename.clone(),
            source: Some(handle.channel.clone()),
            description: Some(compose_description(
                &handle.channel,
                &metadata.cleaned_description,
            )),
            published_at: Some(attachment.posted_at.unwrap_or_else(Utc::now)),
            size: Some(size as u64),
            icon_url,
            min_os_version,
            extra,
        }
    }
}

/// Read the package's Info.plist on the blocking pool
///
/// Packages that cannot be inspected are still published; they only lack
/// the fields the plist would have supplied.
async fn inspect(bytes: Arc<Vec<u8>>, filename: &str) -> Option<PackageInfo> {
    match tokio::task::spawn_blocking(move || inspect_package(&bytes)).await {
        Ok(Ok(info)) => {
            debug!(
                filename = %filename,
                bundle_id = ?info.bundle_id,
                min_os = ?info.min_os_version,
                "Inspected package"
            );
            Some(info)
        }
        Ok(Err(e)) => {
            warn!(filename = %filename, "Package not inspected: {}", e);
            None
        }
        Err(e) => {
            warn!(filename = %filename, "Package inspection panicked: {}", e);
            None
        }
    }
}
