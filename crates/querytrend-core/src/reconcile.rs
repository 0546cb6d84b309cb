//! Same-period conflict resolution.
//!
//! Overlapping exports double-report impressions but split clicks, so
//! duplicate rows for one period collapse to the **maximum** `area_sc`
//! (keeping that row's `sr_area`) and the **sum** of `area_cc`.

use std::collections::HashMap;

use crate::types::PeriodRow;

/// Collapse rows sharing a period label into one row per period.
///
/// Output keeps the order in which each period was first seen. `sr_area`
/// only moves to a later row when its `area_sc` is strictly greater.
pub fn reconcile<I>(rows: I) -> Vec<PeriodRow>
where
    I: IntoIterator<Item = PeriodRow>,
{
    let mut out: Vec<PeriodRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        match index.get(&row.period) {
            Some(&i) => combine(&mut out[i], row),
            None => {
                index.insert(row.period.clone(), out.len());
                out.push(row);
            }
        }
    }

    out
}

/// Fold `row` into `acc` with the max/sum rule.
pub(crate) fn combine(acc: &mut PeriodRow, row: PeriodRow) {
    if row.area_sc > acc.area_sc {
        acc.area_sc = row.area_sc;
        acc.sr_area = row.sr_area;
    }
    acc.area_cc += row.area_cc;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_sc_sum_cc() {
        let rows = vec![
            PeriodRow::new("P", 100.0, 10.0, "north"),
            PeriodRow::new("P", 80.0, 5.0, "south"),
        ];
        let out = reconcile(rows);
        assert_eq!(out, vec![PeriodRow::new("P", 100.0, 15.0, "north")]);
    }

    #[test]
    fn test_sr_area_follows_later_winner() {
        let rows = vec![
            PeriodRow::new("P", 80.0, 5.0, "south"),
            PeriodRow::new("P", 100.0, 10.0, "north"),
        ];
        let out = reconcile(rows);
        assert_eq!(out, vec![PeriodRow::new("P", 100.0, 15.0, "north")]);
    }

    #[test]
    fn test_tie_keeps_first_sr_area() {
        let rows = vec![
            PeriodRow::new("P", 50.0, 1.0, "first"),
            PeriodRow::new("P", 50.0, 1.0, "second"),
        ];
        let out = reconcile(rows);
        assert_eq!(out[0].sr_area, "first");
        assert_eq!(out[0].area_cc, 2.0);
    }

    #[test]
    fn test_distinct_periods_keep_first_seen_order() {
        let rows = vec![
            PeriodRow::new("2024-01-08~2024-01-14", 1.0, 1.0, ""),
            PeriodRow::new("", 2.0, 2.0, ""),
            PeriodRow::new("2024-01-08~2024-01-14", 3.0, 1.0, ""),
            PeriodRow::new("2024-01-01~2024-01-07", 4.0, 4.0, ""),
        ];
        let out = reconcile(rows);
        let periods: Vec<&str> = out.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(
            periods,
            vec!["2024-01-08~2024-01-14", "", "2024-01-01~2024-01-07"]
        );
        assert_eq!(out[0].area_sc, 3.0);
        assert_eq!(out[0].area_cc, 2.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(reconcile(Vec::new()).is_empty());
    }
}
