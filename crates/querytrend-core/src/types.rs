//! Row and log types shared across the pipeline.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One period's measurements for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRow {
    /// Period label (`start~end`).
    pub period: String,
    /// Impressions.
    pub area_sc: f64,
    /// Clicks.
    pub area_cc: f64,
    /// Auxiliary label tied to the row that supplied `area_sc`.
    pub sr_area: String,
}

impl PeriodRow {
    /// Create a new row.
    pub fn new(
        period: impl Into<String>,
        area_sc: f64,
        area_cc: f64,
        sr_area: impl Into<String>,
    ) -> Self {
        Self {
            period: period.into(),
            area_sc,
            area_cc,
            sr_area: sr_area.into(),
        }
    }
}

/// A row produced by the normalizer, still carrying its query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRow {
    pub query: String,
    pub period: String,
    pub area_sc: f64,
    pub area_cc: f64,
    pub sr_area: String,
}

impl NormalizedRow {
    /// Split into the query key and its period row.
    pub fn into_parts(self) -> (String, PeriodRow) {
        (
            self.query,
            PeriodRow {
                period: self.period,
                area_sc: self.area_sc,
                area_cc: self.area_cc,
                sr_area: self.sr_area,
            },
        )
    }
}

/// Output of normalizing one uploaded file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Rows that survived normalization.
    pub rows: Vec<NormalizedRow>,
    /// Data rows present in the source, usable or not.
    pub rows_parsed: usize,
    /// Rows discarded for a missing query.
    pub rows_dropped: usize,
}

impl NormalizedBatch {
    /// Build a batch where every row was usable.
    pub fn from_rows(rows: Vec<NormalizedRow>) -> Self {
        Self {
            rows_parsed: rows.len(),
            rows_dropped: 0,
            rows,
        }
    }

    /// Returns true if no usable rows remain.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An entry in the append-only upload log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// When the upload was merged.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Original file name.
    pub filename: String,
    /// Data rows in the uploaded file.
    pub records_added: usize,
    /// Distinct queries in the uploaded batch.
    pub queries_processed: usize,
}
