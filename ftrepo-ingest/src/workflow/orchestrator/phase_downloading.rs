//! Phase 2: DOWNLOADING
//!
//! Bounded-concurrency package downloads, consumed one at a time by
//! RESOLVING as they complete

use super::{FetchedItem, IngestOrchestrator, PendingItem, RunState};
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl IngestOrchestrator {
    /// Phase 2: DOWNLOADING - Stream queued packages
    ///
    /// At most `max_concurrent_downloads` downloads are in flight and results
    /// come back in queue order. Nothing is fetched until the stream is
    /// polled, so at most that many packages plus the one being resolved are
    /// held in memory. A failed download only affects its own item.
    pub(super) fn phase_downloading(
        &self,
        state: &RunState,
        pending: Vec<PendingItem>,
    ) -> impl Stream<Item = FetchedItem> {
        let concurrency = self.options.max_concurrent_downloads.max(1);
        if pending.is_empty() {
            debug!("Nothing to download");
        } else {
            info!(
                run_id = %state.run_id,
                items = pending.len(),
                concurrency = concurrency,
                "Phase 2: DOWNLOADING"
            );
        }

        let source = Arc::clone(&self.source);
        stream::iter(pending.into_iter().map(move |item| {
            let source = Arc::clone(&source);
            async move {
                let result = source.download(&item.attachment).await;
                match &result {
                    Ok(bytes) => debug!(filename = %item.attachment.filename, bytes = bytes.len(), "Downloaded"),
                    Err(e) => warn!("{}", e),
                }
                FetchedItem { item, result }
            }
        }))
        .buffered(concurrency)
    }
}
