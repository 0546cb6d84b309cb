//! Per-query time series and the dataset that holds them.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::analyze::{average_growth, growth_rates};
use crate::normalize::clean_query;
use crate::period;
use crate::reconcile::reconcile;
use crate::types::PeriodRow;

/// Derived scalar statistics of a series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub total_periods: usize,
    /// Mean of the impression growth rates, excluding the first period.
    pub avg_sc_growth_rate: f64,
    /// Mean of the click growth rates, excluding the first period.
    pub avg_cc_growth_rate: f64,
}

/// The full history of one query.
///
/// All sequences are index-aligned with `periods`, which is unique and
/// sorted by start date. Growth rates and the summary are always derived
/// from the raw sequences, never stored independently. Deserialization
/// repairs whatever it is given (see [`Dataset`]), so a `QuerySeries` in
/// memory always upholds these invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PersistedSeries")]
pub struct QuerySeries {
    pub(crate) periods: Vec<String>,
    pub(crate) area_sc: Vec<f64>,
    pub(crate) area_cc: Vec<f64>,
    pub(crate) sr_area: Vec<String>,
    pub(crate) sc_growth_rates: Vec<f64>,
    pub(crate) cc_growth_rates: Vec<f64>,
    pub(crate) summary: SeriesSummary,
}

/// A borrowed view of one period in a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint<'a> {
    pub period: &'a str,
    pub area_sc: f64,
    pub area_cc: f64,
    pub sr_area: &'a str,
    pub sc_growth_rate: f64,
    pub cc_growth_rate: f64,
}

impl QuerySeries {
    /// Build a series from raw rows: reconcile duplicates, sort, derive.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = PeriodRow>,
    {
        let mut series = Self::default();
        for row in reconcile(rows) {
            series.push_row(row);
        }
        series.sort_chronologically();
        series.rederive();
        series
    }

    pub fn periods(&self) -> &[String] {
        &self.periods
    }

    pub fn area_sc(&self) -> &[f64] {
        &self.area_sc
    }

    pub fn area_cc(&self) -> &[f64] {
        &self.area_cc
    }

    pub fn sr_area(&self) -> &[String] {
        &self.sr_area
    }

    pub fn sc_growth_rates(&self) -> &[f64] {
        &self.sc_growth_rates
    }

    pub fn cc_growth_rates(&self) -> &[f64] {
        &self.cc_growth_rates
    }

    pub fn summary(&self) -> &SeriesSummary {
        &self.summary
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Index of a period label, if present.
    pub fn position(&self, period: &str) -> Option<usize> {
        self.periods.iter().position(|p| p == period)
    }

    /// The point recorded for a period label.
    pub fn point(&self, period: &str) -> Option<SeriesPoint<'_>> {
        self.position(period).map(|i| self.point_at(i))
    }

    /// Iterate over the points in chronological order.
    pub fn points(&self) -> impl Iterator<Item = SeriesPoint<'_>> + '_ {
        (0..self.len()).map(|i| self.point_at(i))
    }

    /// Owned copies of the raw rows, in chronological order.
    pub fn to_rows(&self) -> Vec<PeriodRow> {
        self.points()
            .map(|p| PeriodRow::new(p.period, p.area_sc, p.area_cc, p.sr_area))
            .collect()
    }

    /// Lifetime impressions.
    pub fn total_area_sc(&self) -> f64 {
        self.area_sc.iter().sum()
    }

    /// Lifetime clicks.
    pub fn total_area_cc(&self) -> f64 {
        self.area_cc.iter().sum()
    }

    fn point_at(&self, i: usize) -> SeriesPoint<'_> {
        SeriesPoint {
            period: &self.periods[i],
            area_sc: self.area_sc[i],
            area_cc: self.area_cc[i],
            sr_area: &self.sr_area[i],
            sc_growth_rate: self.sc_growth_rates[i],
            cc_growth_rate: self.cc_growth_rates[i],
        }
    }

    /// Append a row at the end. Derived fields are stale until [`rederive`](Self::rederive).
    pub(crate) fn push_row(&mut self, row: PeriodRow) {
        self.periods.push(row.period);
        self.area_sc.push(row.area_sc);
        self.area_cc.push(row.area_cc);
        self.sr_area.push(row.sr_area);
        self.sc_growth_rates.push(0.0);
        self.cc_growth_rates.push(0.0);
    }

    /// Stable sort of every aligned sequence by period start date.
    pub(crate) fn sort_chronologically(&mut self) {
        let order = period::chronological_order(&self.periods);
        if order.iter().enumerate().all(|(pos, &i)| pos == i) {
            return;
        }

        self.periods = permute(&self.periods, &order);
        self.area_sc = permute(&self.area_sc, &order);
        self.area_cc = permute(&self.area_cc, &order);
        self.sr_area = permute(&self.sr_area, &order);
        self.sc_growth_rates = permute(&self.sc_growth_rates, &order);
        self.cc_growth_rates = permute(&self.cc_growth_rates, &order);
    }

    /// Recompute growth rates and summary from the raw sequences.
    pub(crate) fn rederive(&mut self) {
        self.sc_growth_rates = growth_rates(&self.area_sc);
        self.cc_growth_rates = growth_rates(&self.area_cc);
        self.summary = SeriesSummary {
            total_periods: self.periods.len(),
            avg_sc_growth_rate: average_growth(&self.sc_growth_rates),
            avg_cc_growth_rate: average_growth(&self.cc_growth_rates),
        };
    }

    /// Remove one period from every aligned sequence. Returns false if absent.
    pub(crate) fn remove_period(&mut self, period: &str) -> bool {
        let Some(i) = self.position(period) else {
            return false;
        };
        self.periods.remove(i);
        self.area_sc.remove(i);
        self.area_cc.remove(i);
        self.sr_area.remove(i);
        self.sc_growth_rates.remove(i);
        self.cc_growth_rates.remove(i);
        self.rederive();
        true
    }
}

fn permute<T: Clone>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| values[i].clone()).collect()
}

/// Series as found on disk, possibly ragged or unsorted.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PersistedSeries {
    periods: Vec<String>,
    area_sc: Vec<f64>,
    area_cc: Vec<f64>,
    sr_area: Vec<String>,
}

impl From<PersistedSeries> for QuerySeries {
    fn from(raw: PersistedSeries) -> Self {
        let len = raw.periods.len().min(raw.area_sc.len()).min(raw.area_cc.len());
        let mut sr_area = raw.sr_area.into_iter();

        let rows = raw
            .periods
            .into_iter()
            .zip(raw.area_sc)
            .zip(raw.area_cc)
            .take(len)
            .map(|((period, sc), cc)| PeriodRow {
                period,
                area_sc: sc,
                area_cc: cc,
                sr_area: sr_area.next().unwrap_or_default(),
            });

        QuerySeries::from_rows(rows)
    }
}

/// Mapping from query string to its series. This is the full persisted state.
///
/// Keys are kept sorted so serialization and tie-breaking are deterministic.
///
/// Deserializing accepts either a plain map or a `{"data": {...}}` wrapper.
/// Keys are re-trimmed; empty keys are dropped and keys that collide after
/// trimming are merged with the same-period reconciliation rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Dataset {
    series: BTreeMap<String, QuerySeries>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct queries.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get(&self, query: &str) -> Option<&QuerySeries> {
        self.series.get(query)
    }

    pub fn contains(&self, query: &str) -> bool {
        self.series.contains_key(query)
    }

    /// Iterate over `(query, series)` in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, QuerySeries> {
        self.series.iter()
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> + '_ {
        self.series.keys().map(String::as_str)
    }

    /// Sum of all series lengths.
    pub fn total_records(&self) -> usize {
        self.series.values().map(QuerySeries::len).sum()
    }

    pub(crate) fn entry(&mut self, query: String) -> btree_map::Entry<'_, String, QuerySeries> {
        self.series.entry(query)
    }

    pub(crate) fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&String, &mut QuerySeries) -> bool,
    {
        self.series.retain(f);
    }

    /// Insert a series, merging with an existing one by reconciliation.
    fn absorb(&mut self, query: String, series: QuerySeries) {
        match self.series.entry(query) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(series);
            }
            btree_map::Entry::Occupied(mut slot) => {
                debug!("Merging colliding series for query {:?}", slot.key());
                let mut rows = slot.get().to_rows();
                rows.extend(series.to_rows());
                slot.insert(QuerySeries::from_rows(rows));
            }
        }
    }
}

impl FromIterator<(String, QuerySeries)> for Dataset {
    /// Collect series, cleaning keys as deserialization does.
    fn from_iter<T: IntoIterator<Item = (String, QuerySeries)>>(iter: T) -> Self {
        let mut dataset = Dataset::new();
        for (key, series) in iter {
            let query = clean_query(&key);
            if query.is_empty() {
                debug!("Dropping series with empty query key");
                continue;
            }
            dataset.absorb(query.to_string(), series);
        }
        dataset
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = (&'a String, &'a QuerySeries);
    type IntoIter = btree_map::Iter<'a, String, QuerySeries>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.iter()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PersistedDataset {
    Wrapped(WrappedDataset),
    Plain(BTreeMap<String, QuerySeries>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WrappedDataset {
    data: BTreeMap<String, QuerySeries>,
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = match PersistedDataset::deserialize(deserializer)? {
            PersistedDataset::Wrapped(wrapped) => wrapped.data,
            PersistedDataset::Plain(map) => map,
        };
        Ok(map.into_iter().collect())
    }
}
