//! Merging analyzed batches into the persisted dataset.
//!
//! Merging is idempotent: for a period that already exists, impressions keep
//! the maximum and clicks are **replaced**, so uploading the same file twice
//! leaves the dataset unchanged.

use std::collections::btree_map::Entry;

use serde::Serialize;
use tracing::debug;

use crate::analyze::AnalyzedBatch;
use crate::series::{Dataset, QuerySeries};
use crate::types::PeriodRow;

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    /// Queries new to the dataset.
    pub queries_inserted: usize,
    /// Existing queries that received periods.
    pub queries_updated: usize,
    /// Periods appended to existing queries.
    pub periods_appended: usize,
    /// Periods already present that were reconciled in place.
    pub periods_updated: usize,
}

/// What removing a period changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalSummary {
    /// Queries that contained the period.
    pub removed_queries: usize,
    /// Queries deleted because no periods remained.
    pub deleted_queries: usize,
}

/// Merge `batch` into `dataset`.
pub fn merge_batch(dataset: &mut Dataset, batch: &AnalyzedBatch) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for (query, incoming) in &batch.series {
        match dataset.entry(query.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming.clone());
                summary.queries_inserted += 1;
            }
            Entry::Occupied(mut slot) => {
                let (appended, updated) = merge_series(slot.get_mut(), incoming);
                summary.queries_updated += 1;
                summary.periods_appended += appended;
                summary.periods_updated += updated;
            }
        }
    }

    debug!(
        inserted = summary.queries_inserted,
        updated = summary.queries_updated,
        appended = summary.periods_appended,
        reconciled = summary.periods_updated,
        "Merged batch"
    );

    summary
}

/// Fold `incoming` into `existing`, returning (appended, updated) period counts.
fn merge_series(existing: &mut QuerySeries, incoming: &QuerySeries) -> (usize, usize) {
    let mut appended = 0;
    let mut updated = 0;

    for point in incoming.points() {
        match existing.position(point.period) {
            None => {
                existing.push_row(PeriodRow::new(
                    point.period,
                    point.area_sc,
                    point.area_cc,
                    point.sr_area,
                ));
                appended += 1;
            }
            Some(i) => {
                if point.area_sc > existing.area_sc[i] {
                    existing.area_sc[i] = point.area_sc;
                    existing.sr_area[i] = point.sr_area.to_string();
                }
                existing.area_cc[i] = point.area_cc;
                updated += 1;
            }
        }
    }

    existing.sort_chronologically();
    existing.rederive();
    (appended, updated)
}

/// Remove `period` from every series, deleting series left empty.
pub fn remove_period(dataset: &mut Dataset, period: &str) -> RemovalSummary {
    let mut summary = RemovalSummary::default();

    dataset.retain(|_, series| {
        if series.remove_period(period) {
            summary.removed_queries += 1;
            if series.is_empty() {
                summary.deleted_queries += 1;
                return false;
            }
        }
        true
    });

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::types::{NormalizedBatch, NormalizedRow};

    const W1: &str = "2024-01-01~2024-01-07";
    const W2: &str = "2024-01-08~2024-01-14";
    const W3: &str = "2024-01-15~2024-01-21";

    fn batch(rows: &[(&str, &str, f64, f64, &str)]) -> AnalyzedBatch {
        let rows = rows
            .iter()
            .map(|&(query, period, sc, cc, sr)| NormalizedRow {
                query: query.to_string(),
                period: period.to_string(),
                area_sc: sc,
                area_cc: cc,
                sr_area: sr.to_string(),
            })
            .collect();
        analyze(NormalizedBatch::from_rows(rows))
    }

    #[test]
    fn test_insert_new_query_unchanged() {
        let mut dataset = Dataset::new();
        let incoming = batch(&[("A", W1, 100.0, 10.0, "x")]);
        let summary = merge_batch(&mut dataset, &incoming);

        assert_eq!(summary.queries_inserted, 1);
        assert_eq!(dataset.get("A"), incoming.series.get("A"));
    }

    #[test]
    fn test_append_then_growth() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 10.0, "")]));
        let summary = merge_batch(&mut dataset, &batch(&[("A", W2, 150.0, 20.0, "")]));

        assert_eq!(summary.queries_updated, 1);
        assert_eq!(summary.periods_appended, 1);
        let series = dataset.get("A").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.sc_growth_rates(), &[0.0, 50.0]);
        assert_eq!(series.cc_growth_rates(), &[0.0, 100.0]);
    }

    #[test]
    fn test_out_of_order_append_is_sorted() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W3, 300.0, 3.0, "")]));
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 1.0, "")]));
        merge_batch(&mut dataset, &batch(&[("A", W2, 200.0, 2.0, "")]));

        let series = dataset.get("A").unwrap();
        assert_eq!(series.periods(), &[W1, W2, W3]);
        assert_eq!(series.area_sc(), &[100.0, 200.0, 300.0]);
        assert_eq!(series.sc_growth_rates(), &[0.0, 100.0, 50.0]);
    }

    #[test]
    fn test_existing_period_max_sc_replace_cc() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 10.0, "first")]));

        merge_batch(&mut dataset, &batch(&[("A", W1, 80.0, 7.0, "second")]));
        let series = dataset.get("A").unwrap();
        assert_eq!(series.area_sc(), &[100.0]);
        assert_eq!(series.area_cc(), &[7.0]);
        assert_eq!(series.sr_area(), &["first".to_string()]);

        merge_batch(&mut dataset, &batch(&[("A", W1, 120.0, 9.0, "third")]));
        let series = dataset.get("A").unwrap();
        assert_eq!(series.area_sc(), &[120.0]);
        assert_eq!(series.area_cc(), &[9.0]);
        assert_eq!(series.sr_area(), &["third".to_string()]);
    }

    #[test]
    fn test_equal_sc_keeps_sr_area() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 10.0, "first")]));
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 10.0, "second")]));
        assert_eq!(dataset.get("A").unwrap().sr_area(), &["first".to_string()]);
    }

    #[test]
    fn test_reupload_does_not_double_clicks() {
        let mut dataset = Dataset::new();
        let upload = batch(&[("A", W1, 100.0, 10.0, "")]);
        merge_batch(&mut dataset, &upload);
        merge_batch(&mut dataset, &upload);
        assert_eq!(dataset.get("A").unwrap().area_cc(), &[10.0]);
    }

    #[test]
    fn test_idempotent_bytes() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W1, 1.0, 1.0, ""), ("B", W2, 5.0, 1.0, "")]));

        let upload = batch(&[
            ("A", W2, 100.0, 10.0, "s"),
            ("A", W1, 50.0, 3.0, "t"),
            ("C", W3, 1.0, 1.0, ""),
        ]);
        merge_batch(&mut dataset, &upload);
        let once = serde_json::to_string(&dataset).unwrap();
        merge_batch(&mut dataset, &upload);
        let twice = serde_json::to_string(&dataset).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_period() {
        let mut dataset = Dataset::new();
        merge_batch(
            &mut dataset,
            &batch(&[
                ("A", W1, 100.0, 10.0, ""),
                ("A", W2, 200.0, 10.0, ""),
                ("B", W2, 50.0, 1.0, ""),
                ("C", W1, 5.0, 1.0, ""),
            ]),
        );

        let summary = remove_period(&mut dataset, W2);
        assert_eq!(summary.removed_queries, 2);
        assert_eq!(summary.deleted_queries, 1);
        assert!(!dataset.contains("B"));

        let a = dataset.get("A").unwrap();
        assert_eq!(a.periods(), &[W1]);
        assert_eq!(a.area_sc(), &[100.0]);
        assert_eq!(a.sc_growth_rates(), &[0.0]);
    }

    #[test]
    fn test_remove_missing_period_is_noop() {
        let mut dataset = Dataset::new();
        merge_batch(&mut dataset, &batch(&[("A", W1, 100.0, 10.0, "")]));
        let before = dataset.clone();

        assert_eq!(remove_period(&mut dataset, W3), RemovalSummary::default());
        assert_eq!(dataset, before);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::analyze::analyze;
    use crate::period;
    use crate::types::{NormalizedBatch, NormalizedRow};
    use proptest::prelude::*;

    fn row_strategy() -> impl Strategy<Value = NormalizedRow> {
        (0u8..3, 1u8..29, 0u32..5_000, 0u32..500, "[xy]?").prop_map(|(q, day, sc, cc, sr)| {
            NormalizedRow {
                query: format!("q{q}"),
                period: format!("2024-02-{day:02}~2024-02-{day:02}"),
                area_sc: sc as f64,
                area_cc: cc as f64,
                sr_area: sr,
            }
        })
    }

    fn batch_strategy() -> impl Strategy<Value = AnalyzedBatch> {
        proptest::collection::vec(row_strategy(), 0..25)
            .prop_map(|rows| analyze(NormalizedBatch::from_rows(rows)))
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(first in batch_strategy(), second in batch_strategy()) {
            let mut dataset = Dataset::new();
            merge_batch(&mut dataset, &first);
            merge_batch(&mut dataset, &second);
            let once = dataset.clone();
            merge_batch(&mut dataset, &second);
            prop_assert_eq!(dataset, once);
        }

        #[test]
        fn merged_series_stay_sorted(batches in proptest::collection::vec(batch_strategy(), 1..5)) {
            let mut dataset = Dataset::new();
            for batch in &batches {
                merge_batch(&mut dataset, batch);
            }
            for (_, series) in &dataset {
                let periods = series.periods();
                prop_assert_eq!(series.sc_growth_rates()[0], 0.0);
                prop_assert_eq!(series.cc_growth_rates()[0], 0.0);
                prop_assert_eq!(series.area_sc().len(), periods.len());
                prop_assert_eq!(series.sr_area().len(), periods.len());
                for pair in periods.windows(2) {
                    prop_assert!(period::start_date(&pair[0]) <= period::start_date(&pair[1]));
                    prop_assert_ne!(&pair[0], &pair[1]);
                }
            }
        }
    }
}
