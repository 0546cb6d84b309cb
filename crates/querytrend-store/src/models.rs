//! Reports returned by store operations.

use serde::Serialize;

use querytrend_core::{MergeSummary, UploadRecord};

/// Totals over the stored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Distinct queries in the dataset.
    pub total_queries: usize,
    /// Sum of period counts over all queries.
    pub total_records: usize,
    /// Entries in the upload log.
    pub uploads: usize,
}

/// Outcome of merging one upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    #[serde(flatten)]
    pub summary: MergeSummary,
    /// The log entry appended for this upload.
    pub upload: UploadRecord,
    pub total_queries: usize,
    pub total_records: usize,
}

/// Outcome of removing a period label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub period: String,
    /// Queries that contained the period.
    pub removed_queries: usize,
    /// Queries deleted because nothing remained.
    pub deleted_queries: usize,
    /// Upload-log entries whose filename mentioned the period.
    pub removed_uploads: usize,
    pub remaining_queries: usize,
}

impl RemovalReport {
    /// Returns true if the removal changed nothing.
    pub fn is_noop(&self) -> bool {
        self.removed_queries == 0 && self.removed_uploads == 0
    }
}
