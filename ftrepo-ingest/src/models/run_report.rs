//! Per-run results
//!
//! Every listed item ends in exactly one [`ItemOutcome`]. Failures are
//! recorded here instead of aborting the run.

use crate::services::catalog_store::UpsertReason;
use crate::services::identifier_deriver::DerivationConflict;
use crate::services::metadata_extractor::ExtractorStats;
use crate::workflow::statistics::{OutcomeTally, ScanStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Terminal state of one listed attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemOutcome {
    /// Entry created or replaced
    Applied(UpsertReason),
    /// Catalog already holds a newer or equal version
    RejectedStale,
    /// Package already present in the blob store
    SkippedDuplicate,
    /// Primary and fallback inference both failed
    ExtractionFailed,
    /// Attachment could not be downloaded
    FetchFailed,
    /// Package could not be uploaded
    UploadFailed,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Applied(_) => "applied",
            ItemOutcome::RejectedStale => "rejected-stale",
            ItemOutcome::SkippedDuplicate => "skipped-duplicate",
            ItemOutcome::ExtractionFailed => "extraction-failed",
            ItemOutcome::FetchFailed => "fetch-failed",
            ItemOutcome::UploadFailed => "upload-failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ItemOutcome::ExtractionFailed | ItemOutcome::FetchFailed | ItemOutcome::UploadFailed
        )
    }
}

/// What happened to one attachment
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    /// Channel (and topic) the attachment came from
    pub source: String,
    pub filename: String,
    pub outcome: ItemOutcome,
    /// Error text or resolved version, when there is something to say
    pub detail: Option<String>,
}

/// Summary of one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scan: ScanStats,
    pub tally: OutcomeTally,
    pub extractor: ExtractorStats,
    pub items: Vec<ItemReport>,
    pub conflicts: Vec<DerivationConflict>,
    /// Entries in the primary catalog after the run
    pub catalog_size: usize,
    /// Entries in the derived catalog after the run
    pub derived_size: usize,
}

impl RunReport {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Items that ended in an error state
    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|item| item.outcome.is_failure())
    }
}
