//! Weekly and monthly leaderboards.
//!
//! The dashboard is recomputed from a [`Dataset`] snapshot on every request.
//! It has four parts:
//!
//! - `weeklyAnalysis`: one leaderboard per period label, ranked by
//!   impressions, with rank changes against the previous period.
//! - `latestWeekAnalysis`: growth between the two most recent periods.
//! - `monthlyAnalysis`: the same leaderboards over calendar months.
//! - `latestMonthAnalysis`: growth between the two most recent months.
//!
//! When several records for one query fall in the same bucket (always the
//! case for months spanning several weeks) they are combined with
//! [`CombineRule`]: by default max impressions and summed clicks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::analyze::growth_rate;
use crate::period;
use crate::series::Dataset;

/// How records for one query are combined inside a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineRule {
    /// Max impressions, summed clicks.
    #[default]
    Reconcile,
    /// Sum both metrics.
    Sum,
}

/// Tunables for [`build_dashboard`].
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardOptions {
    /// Entries kept per leaderboard and growth list.
    pub leaderboard_size: usize,
    /// Minimum previous-bucket impressions for the growth views.
    pub growth_min_previous_sc: f64,
    /// Combination rule for monthly buckets.
    pub monthly_combine: CombineRule,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            leaderboard_size: 50,
            growth_min_previous_sc: 300.0,
            monthly_combine: CombineRule::Reconcile,
        }
    }
}

/// Position change relative to the previous leaderboard.
///
/// Serialized as a signed number (`0`, `3`, `-2`) or the string `"new"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankChange {
    /// Same position, or the first leaderboard in a sequence.
    Same,
    /// Moved up by `n` places.
    Up(usize),
    /// Moved down by `n` places.
    Down(usize),
    /// Not on the previous leaderboard.
    New,
}

impl RankChange {
    /// Change from `previous` rank to `current` rank (1-based).
    pub fn between(previous: usize, current: usize) -> Self {
        if previous > current {
            RankChange::Up(previous - current)
        } else if previous < current {
            RankChange::Down(current - previous)
        } else {
            RankChange::Same
        }
    }

    /// Signed delta, positive meaning up. `None` for [`RankChange::New`].
    pub fn delta(self) -> Option<i64> {
        match self {
            RankChange::Same => Some(0),
            RankChange::Up(n) => Some(n as i64),
            RankChange::Down(n) => Some(-(n as i64)),
            RankChange::New => None,
        }
    }
}

impl Serialize for RankChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.delta() {
            Some(delta) => serializer.serialize_i64(delta),
            None => serializer.serialize_str("new"),
        }
    }
}

impl<'de> Deserialize<'de> for RankChange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Delta(i64),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Delta(0) => Ok(RankChange::Same),
            Raw::Delta(n) if n > 0 => Ok(RankChange::Up(n as usize)),
            Raw::Delta(n) => Ok(RankChange::Down(n.unsigned_abs() as usize)),
            Raw::Label(label) if label == "new" => Ok(RankChange::New),
            Raw::Label(other) => Err(serde::de::Error::custom(format!(
                "invalid rank change: {other}"
            ))),
        }
    }
}

fn serialize_previous_rank<S: Serializer>(
    rank: &Option<usize>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match rank {
        Some(rank) => serializer.serialize_u64(*rank as u64),
        None => serializer.serialize_str("-"),
    }
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub query: String,
    pub area_sc: f64,
    pub area_cc: f64,
    pub rank_change: RankChange,
    /// 1-based rank on the previous leaderboard; `"-"` when absent.
    #[serde(serialize_with = "serialize_previous_rank")]
    pub previous_rank: Option<usize>,
    pub previous_sc: f64,
    pub previous_cc: f64,
}

/// One row of a growth list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthEntry {
    pub query: String,
    pub area_sc: f64,
    pub area_cc: f64,
    pub growth_rate: f64,
    pub previous_sc: f64,
    pub previous_cc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSnapshot {
    pub period: String,
    pub top50: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSnapshot {
    pub month: String,
    pub top50: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPeriodGrowth {
    pub latest_period: String,
    pub previous_period: String,
    pub top50: Vec<GrowthEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMonthGrowth {
    pub latest_month: String,
    pub previous_month: String,
    pub top50: Vec<GrowthEntry>,
}

/// The complete dashboard view model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub weekly_analysis: Vec<PeriodSnapshot>,
    pub latest_week_analysis: Vec<LatestPeriodGrowth>,
    pub monthly_analysis: Vec<MonthSnapshot>,
    pub latest_month_analysis: Vec<LatestMonthGrowth>,
}

#[derive(Debug, Clone, Copy)]
struct TallyEntry<'a> {
    query: &'a str,
    area_sc: f64,
    area_cc: f64,
}

/// Per-bucket accumulator that remembers insertion order.
#[derive(Debug, Default)]
struct Tally<'a> {
    entries: Vec<TallyEntry<'a>>,
    index: HashMap<&'a str, usize>,
}

impl<'a> Tally<'a> {
    fn add(&mut self, query: &'a str, area_sc: f64, area_cc: f64, rule: CombineRule) {
        match self.index.get(query) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                match rule {
                    CombineRule::Reconcile => entry.area_sc = entry.area_sc.max(area_sc),
                    CombineRule::Sum => entry.area_sc += area_sc,
                }
                entry.area_cc += area_cc;
            }
            None => {
                self.index.insert(query, self.entries.len());
                self.entries.push(TallyEntry {
                    query,
                    area_sc,
                    area_cc,
                });
            }
        }
    }

    fn get(&self, query: &str) -> Option<&TallyEntry<'a>> {
        self.index.get(query).map(|&i| &self.entries[i])
    }

    /// Entries by impressions descending, ties in insertion order.
    fn ranked(&self, limit: usize) -> Vec<TallyEntry<'a>> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.area_sc.total_cmp(&a.area_sc));
        ranked.truncate(limit);
        ranked
    }
}

/// A labelled bucket in chronological position.
struct Bucket<'a> {
    label: String,
    tally: Tally<'a>,
}

/// Build all four dashboard views from a dataset snapshot.
pub fn build_dashboard(dataset: &Dataset, options: &DashboardOptions) -> DashboardView {
    let weeks = weekly_buckets(dataset);
    let months = monthly_buckets(dataset, options.monthly_combine);
    let size = options.leaderboard_size;

    let weekly_analysis = leaderboards(&weeks, size)
        .into_iter()
        .zip(&weeks)
        .map(|(top50, bucket)| PeriodSnapshot {
            period: bucket.label.clone(),
            top50,
        })
        .collect();

    let monthly_analysis = leaderboards(&months, size)
        .into_iter()
        .zip(&months)
        .map(|(top50, bucket)| MonthSnapshot {
            month: bucket.label.clone(),
            top50,
        })
        .collect();

    let latest_week_analysis = latest_pair(&weeks)
        .map(|(previous, latest)| LatestPeriodGrowth {
            latest_period: latest.label.clone(),
            previous_period: previous.label.clone(),
            top50: growth_list(previous, latest, options, false),
        })
        .into_iter()
        .collect();

    let latest_month_analysis = latest_pair(&months)
        .map(|(previous, latest)| LatestMonthGrowth {
            latest_month: latest.label.clone(),
            previous_month: previous.label.clone(),
            top50: growth_list(previous, latest, options, true),
        })
        .into_iter()
        .collect();

    DashboardView {
        weekly_analysis,
        latest_week_analysis,
        monthly_analysis,
        latest_month_analysis,
    }
}

/// Every distinct period label, ordered by start date then label.
fn sorted_periods(dataset: &Dataset) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut periods: Vec<&str> = dataset
        .iter()
        .flat_map(|(_, series)| series.periods().iter().map(String::as_str))
        .filter(|p| seen.insert(*p))
        .collect();
    periods.sort_by(|a, b| period::compare(a, b).then_with(|| a.cmp(b)));
    periods
}

fn weekly_buckets(dataset: &Dataset) -> Vec<Bucket<'_>> {
    let mut tallies: HashMap<&str, Tally<'_>> = HashMap::new();
    for (query, series) in dataset {
        for point in series.points() {
            tallies.entry(point.period).or_default().add(
                query,
                point.area_sc,
                point.area_cc,
                CombineRule::Reconcile,
            );
        }
    }

    sorted_periods(dataset)
        .into_iter()
        .filter_map(|label| {
            tallies.remove(label).map(|tally| Bucket {
                label: label.to_string(),
                tally,
            })
        })
        .collect()
}

fn monthly_buckets(dataset: &Dataset, rule: CombineRule) -> Vec<Bucket<'_>> {
    let mut tallies: HashMap<String, Tally<'_>> = HashMap::new();
    for (query, series) in dataset {
        for point in series.points() {
            tallies.entry(period::month_key(point.period)).or_default().add(
                query,
                point.area_sc,
                point.area_cc,
                rule,
            );
        }
    }

    // Months appear in the order of their earliest period.
    let mut buckets = Vec::with_capacity(tallies.len());
    for label in sorted_periods(dataset) {
        let month = period::month_key(label);
        if let Some(tally) = tallies.remove(&month) {
            buckets.push(Bucket { label: month, tally });
        }
    }
    buckets
}

/// Ranked leaderboards with rank changes against the preceding bucket.
fn leaderboards(buckets: &[Bucket<'_>], size: usize) -> Vec<Vec<LeaderboardEntry>> {
    let mut boards: Vec<Vec<LeaderboardEntry>> = Vec::with_capacity(buckets.len());

    for bucket in buckets {
        let board = {
            let previous: Option<HashMap<&str, (usize, &LeaderboardEntry)>> =
                boards.last().map(|board| {
                    board
                        .iter()
                        .enumerate()
                        .map(|(i, entry)| (entry.query.as_str(), (i + 1, entry)))
                        .collect()
                });
            annotate(bucket, size, previous.as_ref())
        };
        boards.push(board);
    }

    boards
}

/// Rank a bucket and annotate each entry against the previous leaderboard.
fn annotate(
    bucket: &Bucket<'_>,
    size: usize,
    previous: Option<&HashMap<&str, (usize, &LeaderboardEntry)>>,
) -> Vec<LeaderboardEntry> {
    bucket
        .tally
        .ranked(size)
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let rank = i + 1;
            let (rank_change, previous_rank, previous_sc, previous_cc) = match previous {
                None => (RankChange::Same, None, 0.0, 0.0),
                Some(previous) => match previous.get(entry.query) {
                    Some(&(prev_rank, prev)) => (
                        RankChange::between(prev_rank, rank),
                        Some(prev_rank),
                        prev.area_sc,
                        prev.area_cc,
                    ),
                    None => (RankChange::New, None, 0.0, 0.0),
                },
            };
            LeaderboardEntry {
                query: entry.query.to_string(),
                area_sc: entry.area_sc,
                area_cc: entry.area_cc,
                rank_change,
                previous_rank,
                previous_sc,
                previous_cc,
            }
        })
        .collect()
}

fn latest_pair<'b, 'a>(buckets: &'b [Bucket<'a>]) -> Option<(&'b Bucket<'a>, &'b Bucket<'a>)> {
    match buckets {
        [.., previous, latest] => Some((previous, latest)),
        _ => None,
    }
}

/// Growth between two buckets for queries present in both.
fn growth_list(
    previous: &Bucket<'_>,
    latest: &Bucket<'_>,
    options: &DashboardOptions,
    require_positive: bool,
) -> Vec<GrowthEntry> {
    let mut entries: Vec<GrowthEntry> = latest
        .tally
        .entries
        .iter()
        .filter_map(|current| {
            let prev = previous.tally.get(current.query)?;
            if require_positive && (current.area_sc <= 0.0 || prev.area_sc <= 0.0) {
                return None;
            }
            if prev.area_sc < options.growth_min_previous_sc {
                return None;
            }
            Some(GrowthEntry {
                query: current.query.to_string(),
                area_sc: current.area_sc,
                area_cc: current.area_cc,
                growth_rate: growth_rate(prev.area_sc, current.area_sc),
                previous_sc: prev.area_sc,
                previous_cc: prev.area_cc,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.growth_rate.total_cmp(&a.growth_rate));
    entries.truncate(options.leaderboard_size);
    entries
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::analyze::analyze;
    use crate::merge::merge_batch;
    use crate::types::{NormalizedBatch, NormalizedRow};
    use proptest::prelude::*;

    fn dataset_strategy() -> impl Strategy<Value = Dataset> {
        let row = (0u8..8, 1u8..5, 0u32..2_000, 0u32..100).prop_map(|(q, w, sc, cc)| {
            let day = 1 + (w - 1) * 7;
            NormalizedRow {
                query: format!("q{q}"),
                period: format!("2024-03-{day:02}~2024-03-{:02}", day + 6),
                area_sc: sc as f64,
                area_cc: cc as f64,
                sr_area: String::new(),
            }
        });
        proptest::collection::vec(row, 0..60).prop_map(|rows| {
            let mut dataset = Dataset::new();
            merge_batch(&mut dataset, &analyze(NormalizedBatch::from_rows(rows)));
            dataset
        })
    }

    proptest! {
        #[test]
        fn growth_floor_holds(dataset in dataset_strategy()) {
            let view = build_dashboard(&dataset, &DashboardOptions::default());
            for latest in &view.latest_week_analysis {
                for entry in &latest.top50 {
                    prop_assert!(entry.previous_sc >= 300.0);
                }
            }
        }

        #[test]
        fn new_entries_absent_from_previous_board(dataset in dataset_strategy()) {
            let options = DashboardOptions { leaderboard_size: 3, ..DashboardOptions::default() };
            let view = build_dashboard(&dataset, &options);
            for pair in view.weekly_analysis.windows(2) {
                let previous: HashSet<&str> = pair[0].top50.iter().map(|e| e.query.as_str()).collect();
                for entry in &pair[1].top50 {
                    let was_listed = previous.contains(entry.query.as_str());
                    prop_assert_eq!(entry.rank_change == RankChange::New, !was_listed);
                }
            }
        }
    }
}
