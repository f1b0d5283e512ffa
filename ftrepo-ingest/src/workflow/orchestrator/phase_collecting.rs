//! Phase 1: COLLECTING
//!
//! Channel, topic and attachment listing plus the duplicate check

use super::{IngestOrchestrator, PendingItem, RunState};
use crate::error::RunError;
use crate::models::ItemOutcome;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl IngestOrchestrator {
    /// Phase 1: COLLECTING - List attachments and queue new packages
    ///
    /// A package whose filename the blob store already holds is skipped
    /// here, before any download or inference. The same filename seen twice
    /// in one run is queued only once.
    pub(super) async fn phase_collecting(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Vec<PendingItem>, RunError> {
        info!(run_id = %state.run_id, "Phase 1: COLLECTING");

        state.listing = self.blob_store.list().await?;
        debug!(packages = state.listing.len(), "Blob store listing loaded");

        let channels = self.source.list_channels().await?;
        let budget = self.options.max_items_per_source.max(1);
        let mut queued: HashSet<String> = HashSet::new();
        let mut pending = Vec::new();

        for channel in channels {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let mut handles = vec![channel.clone()];
            match self.source.list_topics(&channel).await {
                Ok(topics) => handles.extend(topics),
                Err(e) => warn!(channel = %channel.label(), "Failed to list topics: {}", e),
            }

            for handle in handles {
                state.scan.sources_scanned += 1;
                let label = handle.label();

                let attachments = match self.source.list_attachments(&handle, budget).await {
                    Ok(attachments) => attachments,
                    Err(e) => {
                        warn!(source = %label, "Skipping unavailable source: {}", e);
                        state.scan.sources_unavailable += 1;
                        continue;
                    }
                };

                for attachment in attachments.into_iter().take(budget) {
                    state.scan.attachments_listed += 1;

                    if state.listing.contains(&attachment.filename)
                        || !queued.insert(attachment.filename.clone())
                    {
                        debug!(source = %label, filename = %attachment.filename, "Already published");
                        state.record(&label, &attachment.filename, ItemOutcome::SkippedDuplicate, None);
                        continue;
                    }

                    pending.push(PendingItem {
                        handle: handle.clone(),
                        attachment,
                    });
                }
            }
        }

        info!(
            run_id = %state.run_id,
            queued = pending.len(),
            skipped = state.tally.skipped_duplicate,
            "{}",
            state.scan.display_string()
        );
        Ok(pending)
    }
}
