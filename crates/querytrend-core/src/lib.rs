//! Incremental merge and reconciliation engine for search-query metrics.
//!
//! This crate holds the pure part of querytrend: it turns uploaded exports
//! of per-query impressions (`areaSc`) and clicks (`areaCc`) into a
//! cumulative per-query history and derives leaderboards and growth views
//! from it. It performs no I/O besides decoding byte buffers; persistence
//! lives in `querytrend-store`.
//!
//! # Pipeline
//!
//! 1. [`normalize_bytes`]: decode a CSV/JSON upload into [`NormalizedRow`]s.
//! 2. [`analyze`]: group rows by query, collapse same-period duplicates
//!    ([`reconcile`]) and derive growth rates, giving an [`AnalyzedBatch`].
//! 3. [`merge_batch`]: fold the batch into a [`Dataset`] idempotently.
//! 4. [`build_dashboard`] / [`analyze_filter`]: read-only views.
//!
//! # Example
//!
//! ```
//! use querytrend_core::{
//!     analyze, build_dashboard, merge_batch, normalize_bytes, DashboardOptions, Dataset,
//!     SourceFormat,
//! };
//!
//! let csv = "query,period,area_sc,area_cc\n\
//!            A,2024-01-01~2024-01-07,100,10\n\
//!            A,2024-01-08~2024-01-14,150,20\n";
//!
//! let batch = analyze(normalize_bytes(csv.as_bytes(), SourceFormat::Csv)?);
//! let mut dataset = Dataset::new();
//! merge_batch(&mut dataset, &batch);
//!
//! let series = dataset.get("A").unwrap();
//! assert_eq!(series.sc_growth_rates(), &[0.0, 50.0]);
//!
//! let view = build_dashboard(&dataset, &DashboardOptions::default());
//! assert_eq!(view.weekly_analysis.len(), 2);
//! # Ok::<(), querytrend_core::Error>(())
//! ```

pub mod analyze;
pub mod attributes;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod merge;
pub mod normalize;
pub mod period;
pub mod reconcile;
pub mod series;
pub mod types;

pub use analyze::{AnalyzedBatch, analyze, growth_rate};
pub use attributes::{AttributeTable, CodeOption, FilterChoices, QueryAttributes};
pub use dashboard::{
    CombineRule, DashboardOptions, DashboardView, GrowthEntry, LatestMonthGrowth,
    LatestPeriodGrowth, LeaderboardEntry, MonthSnapshot, PeriodSnapshot, RankChange,
    build_dashboard,
};
pub use error::{Error, Result};
pub use filter::{FilterAnalysis, FilterCriteria, FilterLimits, analyze_filter};
pub use merge::{MergeSummary, RemovalSummary, merge_batch, remove_period};
pub use normalize::{SourceFormat, normalize_bytes, normalize_file};
pub use reconcile::reconcile;
pub use series::{Dataset, QuerySeries, SeriesPoint, SeriesSummary};
pub use types::{NormalizedBatch, NormalizedRow, PeriodRow, UploadRecord};
