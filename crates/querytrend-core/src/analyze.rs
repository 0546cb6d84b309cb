//! Turning a normalized batch into per-query series.

use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::debug;

use crate::series::QuerySeries;
use crate::types::{NormalizedBatch, PeriodRow, UploadRecord};

/// Percentage change from `prev` to `curr`; zero when `prev` is zero.
pub fn growth_rate(prev: f64, curr: f64) -> f64 {
    if prev != 0.0 {
        (curr - prev) / prev * 100.0
    } else {
        0.0
    }
}

/// Growth rate at every index of `values`. Index 0 is always 0.
pub fn growth_rates(values: &[f64]) -> Vec<f64> {
    let mut rates = Vec::with_capacity(values.len());
    if values.is_empty() {
        return rates;
    }
    rates.push(0.0);
    rates.extend(values.windows(2).map(|w| growth_rate(w[0], w[1])));
    rates
}

/// Mean of `rates[1..]`, or 0 with fewer than two entries.
pub fn average_growth(rates: &[f64]) -> f64 {
    if rates.len() < 2 {
        return 0.0;
    }
    let tail = &rates[1..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// A batch grouped by query, ready to merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedBatch {
    /// One reconciled, sorted series per distinct query.
    pub series: BTreeMap<String, QuerySeries>,
    /// Data rows in the source file.
    pub rows_parsed: usize,
    /// Rows that reached analysis.
    pub rows_used: usize,
}

impl AnalyzedBatch {
    /// Distinct queries in the batch.
    pub fn query_count(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// The log entry recorded when this batch is merged.
    ///
    /// Counts describe the batch itself, not the dataset after merging.
    pub fn upload_record(&self, filename: &str, timestamp: OffsetDateTime) -> UploadRecord {
        UploadRecord {
            timestamp,
            filename: filename.to_string(),
            records_added: self.rows_parsed,
            queries_processed: self.query_count(),
        }
    }
}

/// Group rows by exact query string and build one series per query.
pub fn analyze(batch: NormalizedBatch) -> AnalyzedBatch {
    let rows_used = batch.rows.len();
    let mut grouped: BTreeMap<String, Vec<PeriodRow>> = BTreeMap::new();
    for row in batch.rows {
        let (query, row) = row.into_parts();
        grouped.entry(query).or_default().push(row);
    }

    let series: BTreeMap<String, QuerySeries> = grouped
        .into_iter()
        .map(|(query, rows)| (query, QuerySeries::from_rows(rows)))
        .collect();

    debug!(
        queries = series.len(),
        rows = rows_used,
        "Analyzed batch"
    );

    AnalyzedBatch {
        series,
        rows_parsed: batch.rows_parsed,
        rows_used,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn first_growth_rate_is_zero(values in proptest::collection::vec(0.0f64..1e9, 1..30)) {
            let rates = growth_rates(&values);
            prop_assert_eq!(rates.len(), values.len());
            prop_assert_eq!(rates[0], 0.0);
        }
    }
}
