//! Run statistics
//!
//! Counters are plain values updated by the orchestrator between items;
//! nothing here is shared across tasks.

use crate::models::ItemOutcome;
use crate::services::catalog_store::UpsertReason;
use serde::Serialize;

/// What the collecting phase saw
///
/// Display: "N sources scanned (M unavailable), K attachments listed"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub sources_scanned: usize,
    pub sources_unavailable: usize,
    pub attachments_listed: usize,
}

impl ScanStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} sources scanned ({} unavailable), {} attachments listed",
            self.sources_scanned, self.sources_unavailable, self.attachments_listed
        )
    }
}

/// Count of items per terminal outcome, plus catalog maintenance counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub applied_new: usize,
    pub applied_upgraded: usize,
    pub applied_unversioned: usize,
    pub rejected_stale: usize,
    pub skipped_duplicate: usize,
    pub extraction_failed: usize,
    pub fetch_failed: usize,
    pub upload_failed: usize,
    /// Entries dropped because their package vanished from the blob store
    pub orphaned: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Applied(UpsertReason::New) => self.applied_new += 1,
            ItemOutcome::Applied(UpsertReason::Upgraded) => self.applied_upgraded += 1,
            ItemOutcome::Applied(UpsertReason::ReplacedUnversioned) => {
                self.applied_unversioned += 1
            }
            // Stale upserts are never reported as applied
            ItemOutcome::Applied(UpsertReason::Stale) | ItemOutcome::RejectedStale => {
                self.rejected_stale += 1
            }
            ItemOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            ItemOutcome::ExtractionFailed => self.extraction_failed += 1,
            ItemOutcome::FetchFailed => self.fetch_failed += 1,
            ItemOutcome::UploadFailed => self.upload_failed += 1,
        }
    }

    pub fn applied(&self) -> usize {
        self.applied_new + self.applied_upgraded + self.applied_unversioned
    }

    pub fn failed(&self) -> usize {
        self.extraction_failed + self.fetch_failed + self.upload_failed
    }

    /// Items that reached a terminal outcome
    pub fn total(&self) -> usize {
        self.applied() + self.rejected_stale + self.skipped_duplicate + self.failed()
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} applied ({} new, {} upgraded, {} unversioned), {} stale, {} duplicates, \
             {} failed (extraction {}, fetch {}, upload {}), {} orphaned",
            self.applied(),
            self.applied_new,
            self.applied_upgraded,
            self.applied_unversioned,
            self.rejected_stale,
            self.skipped_duplicate,
            self.failed(),
            self.extraction_failed,
            self.fetch_failed,
            self.upload_failed,
            self.orphaned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_totals() {
        let mut tally = OutcomeTally::default();
        tally.record(ItemOutcome::Applied(UpsertReason::New));
        tally.record(ItemOutcome::Applied(UpsertReason::Upgraded));
        tally.record(ItemOutcome::RejectedStale);
        tally.record(ItemOutcome::SkippedDuplicate);
        tally.record(ItemOutcome::ExtractionFailed);
        tally.record(ItemOutcome::FetchFailed);

        assert_eq!(tally.applied(), 2);
        assert_eq!(tally.failed(), 2);
        assert_eq!(tally.total(), 6);
    }

    #[test]
    fn test_display_strings() {
        let tally = OutcomeTally {
            applied_new: 4,
            extraction_failed: 1,
            ..Default::default()
        };
        assert_eq!(
            tally.display_string(),
            "4 applied (4 new, 0 upgraded, 0 unversioned), 0 stale, 0 duplicates, \
             1 failed (extraction 1, fetch 0, upload 0), 0 orphaned"
        );

        let scan = ScanStats {
            sources_scanned: 3,
            sources_unavailable: 1,
            attachments_listed: 12,
        };
        assert_eq!(
            scan.display_string(),
            "3 sources scanned (1 unavailable), 12 attachments listed"
        );
    }
}
