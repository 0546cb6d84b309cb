//! Attribute-filtered aggregates over the dataset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeTable, QueryAttributes};
use crate::period;
use crate::series::{Dataset, QuerySeries};

/// Multi-select filter. Values within a dimension are alternatives;
/// dimensions combine conjunctively. An empty dimension is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    pub travel_city_code: Vec<String>,
    pub travel_ptn: Vec<String>,
    pub travel_ptn_code: Vec<String>,
    pub travel_country_code: Vec<String>,
    pub travel_month: Vec<String>,
}

impl FilterCriteria {
    /// Returns true if no dimension is constrained.
    pub fn is_unconstrained(&self) -> bool {
        self.travel_city_code.is_empty()
            && self.travel_ptn.is_empty()
            && self.travel_ptn_code.is_empty()
            && self.travel_country_code.is_empty()
            && self.travel_month.is_empty()
    }

    /// Whether a query with these attributes passes the filter.
    ///
    /// A query without attributes only passes an unconstrained filter.
    pub fn matches(&self, attributes: Option<&QueryAttributes>) -> bool {
        let dimensions = [
            (&self.travel_city_code, attributes.map(|a| a.travel_city_code.as_str())),
            (&self.travel_ptn, attributes.map(|a| a.travel_ptn.as_str())),
            (&self.travel_ptn_code, attributes.map(|a| a.travel_ptn_code.as_str())),
            (&self.travel_country_code, attributes.map(|a| a.travel_country_code.as_str())),
            (&self.travel_month, attributes.map(|a| a.travel_month.as_str())),
        ];

        dimensions.iter().all(|(allowed, value)| {
            allowed.is_empty() || value.is_some_and(|v| allowed.iter().any(|a| a == v))
        })
    }
}

/// Output size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimits {
    /// Matching queries returned in detail.
    pub result_limit: usize,
    /// Entries per distribution.
    pub distribution_limit: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            result_limit: 100,
            distribution_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSummary {
    pub total_queries: usize,
    pub total_area_sc: f64,
    pub total_area_cc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub period: String,
    pub area_sc: f64,
    pub area_cc: f64,
}

/// A matching query with its lifetime totals and history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredQuery {
    pub query: String,
    pub total_area_sc: f64,
    pub total_area_cc: f64,
    pub periods: Vec<String>,
    pub area_sc: Vec<f64>,
    pub area_cc: Vec<f64>,
    pub weekly_trend: Vec<TrendPoint>,
    /// Attributes of the query; all empty when the table has none.
    pub query_code: QueryAttributes,
}

/// `(value, count)` pairs, most frequent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Distribution {
    pub cities: Vec<(String, usize)>,
    pub countries: Vec<(String, usize)>,
    pub months: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAnalysis {
    pub summary: FilterSummary,
    pub queries: Vec<FilteredQuery>,
    pub weekly_trend: Vec<TrendPoint>,
    pub distribution: Distribution,
}

/// Apply `criteria` to the dataset using attributes from `table`.
///
/// Summary, trend and distributions cover every match; only the detailed
/// query list is capped.
pub fn analyze_filter(
    dataset: &Dataset,
    table: &AttributeTable,
    criteria: &FilterCriteria,
    limits: FilterLimits,
) -> FilterAnalysis {
    let mut matches: Vec<(&str, &QuerySeries, Option<&QueryAttributes>, f64)> = dataset
        .iter()
        .filter_map(|(query, series)| {
            let attributes = table.get(query);
            criteria
                .matches(attributes)
                .then(|| (query.as_str(), series, attributes, series.total_area_sc()))
        })
        .collect();
    matches.sort_by(|a, b| b.3.total_cmp(&a.3));

    let summary = FilterSummary {
        total_queries: matches.len(),
        total_area_sc: matches.iter().map(|m| m.3).sum(),
        total_area_cc: matches.iter().map(|m| m.1.total_area_cc()).sum(),
    };

    let weekly_trend = combined_trend(matches.iter().map(|m| m.1));

    let known = || matches.iter().filter_map(|m| m.2);
    let distribution = Distribution {
        cities: top_counts(known().map(|a| &a.travel_city), limits),
        countries: top_counts(known().map(|a| &a.travel_country), limits),
        months: top_counts(known().map(|a| &a.travel_month), limits),
    };

    let queries = matches
        .iter()
        .take(limits.result_limit)
        .map(|&(query, series, attributes, total_sc)| FilteredQuery {
            query: query.to_string(),
            total_area_sc: total_sc,
            total_area_cc: series.total_area_cc(),
            periods: series.periods().to_vec(),
            area_sc: series.area_sc().to_vec(),
            area_cc: series.area_cc().to_vec(),
            weekly_trend: series
                .points()
                .map(|p| TrendPoint {
                    period: p.period.to_string(),
                    area_sc: p.area_sc,
                    area_cc: p.area_cc,
                })
                .collect(),
            query_code: attributes.cloned().unwrap_or_default(),
        })
        .collect();

    FilterAnalysis {
        summary,
        queries,
        weekly_trend,
        distribution,
    }
}

/// Per-period sums across series, in chronological order.
fn combined_trend<'a>(series: impl Iterator<Item = &'a QuerySeries>) -> Vec<TrendPoint> {
    let mut totals: HashMap<&str, (f64, f64)> = HashMap::new();
    for s in series {
        for point in s.points() {
            let total = totals.entry(point.period).or_default();
            total.0 += point.area_sc;
            total.1 += point.area_cc;
        }
    }

    let mut trend: Vec<TrendPoint> = totals
        .into_iter()
        .map(|(period, (area_sc, area_cc))| TrendPoint {
            period: period.to_string(),
            area_sc,
            area_cc,
        })
        .collect();
    trend.sort_by(|a, b| {
        period::compare(&a.period, &b.period).then_with(|| a.period.cmp(&b.period))
    });
    trend
}

fn top_counts<'a>(
    values: impl Iterator<Item = &'a String>,
    limits: FilterLimits,
) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values.filter(|v| !v.is_empty()) {
        *counts.entry(value.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limits.distribution_limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeriodRow;

    const W1: &str = "2024-01-01~2024-01-07";
    const W2: &str = "2024-01-08~2024-01-14";

    fn series(points: &[(&str, f64, f64)]) -> QuerySeries {
        QuerySeries::from_rows(points.iter().map(|&(p, sc, cc)| PeriodRow::new(p, sc, cc, "")))
    }

    fn attrs(city_code: &str, city: &str, month: &str) -> QueryAttributes {
        QueryAttributes {
            travel_city: city.to_string(),
            travel_city_code: city_code.to_string(),
            travel_country: "Japan".to_string(),
            travel_country_code: "JP".to_string(),
            travel_month: month.to_string(),
            ..QueryAttributes::default()
        }
    }

    fn fixture() -> (Dataset, AttributeTable) {
        let dataset: Dataset = vec![
            ("tokyo hotel".to_string(), series(&[(W1, 100.0, 10.0), (W2, 200.0, 20.0)])),
            ("osaka trip".to_string(), series(&[(W2, 500.0, 5.0)])),
            ("kyoto food".to_string(), series(&[(W1, 50.0, 1.0)])),
            ("unlabelled".to_string(), series(&[(W1, 1000.0, 1.0)])),
        ]
        .into_iter()
        .collect();

        let mut table = AttributeTable::empty();
        table.insert("tokyo hotel".to_string(), attrs("TYO", "Tokyo", "2024-05"));
        table.insert("osaka trip".to_string(), attrs("OSA", "Osaka", "2024-05"));
        table.insert("kyoto food".to_string(), attrs("KYO", "Kyoto", "2024-06"));
        (dataset, table)
    }

    #[test]
    fn test_matches() {
        let criteria = FilterCriteria {
            travel_city_code: vec!["TYO".to_string(), "OSA".to_string()],
            travel_month: vec!["2024-05".to_string()],
            ..FilterCriteria::default()
        };
        assert!(criteria.matches(Some(&attrs("TYO", "Tokyo", "2024-05"))));
        assert!(!criteria.matches(Some(&attrs("TYO", "Tokyo", "2024-06"))));
        assert!(!criteria.matches(Some(&attrs("KYO", "Kyoto", "2024-05"))));
        assert!(!criteria.matches(None));
        assert!(FilterCriteria::default().matches(None));
        assert!(FilterCriteria::default().is_unconstrained());
    }

    #[test]
    fn test_criteria_deserialize_partial() {
        let criteria: FilterCriteria =
            serde_json::from_str(r#"{"travelCityCode": ["TYO"]}"#).unwrap();
        assert_eq!(criteria.travel_city_code, vec!["TYO"]);
        assert!(criteria.travel_month.is_empty());
    }

    #[test]
    fn test_analyze_filter() {
        let (dataset, table) = fixture();
        let criteria = FilterCriteria {
            travel_month: vec!["2024-05".to_string()],
            ..FilterCriteria::default()
        };
        let result = analyze_filter(&dataset, &table, &criteria, FilterLimits::default());

        assert_eq!(result.summary.total_queries, 2);
        assert_eq!(result.summary.total_area_sc, 800.0);
        assert_eq!(result.summary.total_area_cc, 35.0);

        let names: Vec<&str> = result.queries.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(names, vec!["osaka trip", "tokyo hotel"]);
        assert_eq!(result.queries[1].total_area_sc, 300.0);
        assert_eq!(result.queries[1].weekly_trend.len(), 2);
        assert_eq!(result.queries[0].query_code.travel_city_code, "OSA");

        assert_eq!(result.weekly_trend.len(), 2);
        assert_eq!(result.weekly_trend[0].period, W1);
        assert_eq!(result.weekly_trend[0].area_sc, 100.0);
        assert_eq!(result.weekly_trend[1].area_sc, 700.0);
        assert_eq!(result.weekly_trend[1].area_cc, 25.0);

        assert_eq!(result.distribution.months, vec![("2024-05".to_string(), 2)]);
        assert_eq!(result.distribution.countries, vec![("Japan".to_string(), 2)]);
        assert_eq!(
            result.distribution.cities,
            vec![("Osaka".to_string(), 1), ("Tokyo".to_string(), 1)]
        );
    }

    #[test]
    fn test_unconstrained_includes_unlabelled() {
        let (dataset, table) = fixture();
        let criteria = FilterCriteria::default();
        let result = analyze_filter(&dataset, &table, &criteria, FilterLimits::default());
        assert_eq!(result.summary.total_queries, 4);
        assert_eq!(result.queries[0].query, "unlabelled");
        assert_eq!(result.queries[0].query_code, QueryAttributes::default());
    }

    #[test]
    fn test_empty_table_matches_nothing_when_constrained() {
        let (dataset, _) = fixture();
        let criteria = FilterCriteria {
            travel_city_code: vec!["TYO".to_string()],
            ..FilterCriteria::default()
        };
        let table = AttributeTable::empty();
        let result = analyze_filter(&dataset, &table, &criteria, FilterLimits::default());
        assert_eq!(result.summary.total_queries, 0);
        assert!(result.queries.is_empty());
        assert!(result.weekly_trend.is_empty());
    }

    #[test]
    fn test_limits() {
        let (dataset, table) = fixture();
        let limits = FilterLimits {
            result_limit: 1,
            distribution_limit: 1,
        };
        let result = analyze_filter(&dataset, &table, &FilterCriteria::default(), limits);
        assert_eq!(result.queries.len(), 1);
        assert_eq!(result.summary.total_queries, 4);
        assert_eq!(result.distribution.months, vec![("2024-05".to_string(), 2)]);
        assert_eq!(result.distribution.cities.len(), 1);
    }
}
