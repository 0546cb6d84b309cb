//! External per-query attribute table (city, country, pattern, month codes).
//!
//! The table is a CSV file with a `query` column plus any of the `travel_*`
//! columns below. Unknown columns are ignored and missing ones read as empty.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::normalize::clean_query;

/// Attributes known for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAttributes {
    #[serde(default)]
    pub travel_city: String,
    #[serde(rename = "travel_cityCode", default)]
    pub travel_city_code: String,
    #[serde(default)]
    pub travel_ptn: String,
    #[serde(rename = "travel_ptnCode", default)]
    pub travel_ptn_code: String,
    #[serde(default)]
    pub travel_country: String,
    #[serde(rename = "travel_countryCode", default)]
    pub travel_country_code: String,
    #[serde(default)]
    pub travel_month: String,
}

const COLUMNS: [&str; 7] = [
    "travel_city",
    "travel_cityCode",
    "travel_ptn",
    "travel_ptnCode",
    "travel_country",
    "travel_countryCode",
    "travel_month",
];

impl QueryAttributes {
    fn from_cells(cells: [String; 7]) -> Self {
        let [city, city_code, ptn, ptn_code, country, country_code, month] = cells;
        Self {
            travel_city: city,
            travel_city_code: city_code,
            travel_ptn: ptn,
            travel_ptn_code: ptn_code,
            travel_country: country,
            travel_country_code: country_code,
            travel_month: month,
        }
    }
}

/// A code with a human-readable label, e.g. `SEL(Seoul)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeOption {
    pub code: String,
    pub display: String,
    pub name: String,
}

/// The values a filter can choose from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterChoices {
    pub travel_city_code: Vec<CodeOption>,
    pub travel_ptn: Vec<String>,
    pub travel_ptn_code: Vec<String>,
    pub travel_country_code: Vec<CodeOption>,
    pub travel_month: Vec<String>,
}

/// Attribute rows indexed by query. Later rows win for a repeated query.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    rows: Vec<(String, QueryAttributes)>,
    index: HashMap<String, usize>,
}

impl AttributeTable {
    /// A table that knows nothing about any query.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a CSV attribute table from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        debug!(
            "Loaded {} attribute rows from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Parse a CSV attribute table.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);

        let Some(query_col) = position("query") else {
            return Err(Error::MissingColumns {
                missing: vec!["query"],
                available: headers.iter().map(str::to_string).collect(),
            });
        };
        let columns = COLUMNS.map(position);

        let mut table = Self::empty();
        for record in csv.records() {
            let record = record?;
            let query = clean_query(record.get(query_col).unwrap_or_default());
            if query.is_empty() {
                continue;
            }
            let cells = columns.map(|col| {
                col.and_then(|i| record.get(i))
                    .unwrap_or_default()
                    .to_string()
            });
            table.insert(query.to_string(), QueryAttributes::from_cells(cells));
        }

        Ok(table)
    }

    /// Add a row; a repeated query replaces the earlier attributes.
    pub fn insert(&mut self, query: String, attributes: QueryAttributes) {
        self.index.insert(query.clone(), self.rows.len());
        self.rows.push((query, attributes));
    }

    pub fn get(&self, query: &str) -> Option<&QueryAttributes> {
        self.index.get(query).map(|&i| &self.rows[i].1)
    }

    /// Number of rows read, including repeats.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct filter values, sorted. Codes are labelled with the first
    /// name seen for them.
    pub fn choices(&self) -> FilterChoices {
        let attrs = || self.rows.iter().map(|(_, a)| a);

        FilterChoices {
            travel_city_code: code_options(attrs().map(|a| (&a.travel_city_code, &a.travel_city))),
            travel_ptn: distinct(attrs().map(|a| &a.travel_ptn)),
            travel_ptn_code: distinct(attrs().map(|a| &a.travel_ptn_code)),
            travel_country_code: code_options(
                attrs().map(|a| (&a.travel_country_code, &a.travel_country)),
            ),
            travel_month: distinct(attrs().map(|a| &a.travel_month)),
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    values
        .filter(|v| !v.is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn code_options<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> Vec<CodeOption> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    for (code, name) in pairs {
        if code.is_empty() || name.is_empty() {
            continue;
        }
        names.entry(code.as_str()).or_insert(name.as_str());
    }

    let mut options: Vec<CodeOption> = names
        .into_iter()
        .map(|(code, name)| CodeOption {
            code: code.to_string(),
            display: format!("{code}({name})"),
            name: name.to_string(),
        })
        .collect();
    options.sort_by(|a, b| a.display.cmp(&b.display));
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
query,travel_city,travel_cityCode,travel_ptn,travel_ptnCode,travel_country,travel_countryCode,travel_month,extra
tokyo hotel,Tokyo,TYO,hotel,H,Japan,JP,2024-05,x
osaka trip,Osaka,OSA,trip,T,Japan,JP,,y
tokyo flight,Tokio,TYO,flight,F,Japan,JP,2024-06,z
,Nowhere,NOW,,,,,,
";

    #[test]
    fn test_parse_table() {
        let table = AttributeTable::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);

        let attrs = table.get("osaka trip").unwrap();
        assert_eq!(attrs.travel_city_code, "OSA");
        assert_eq!(attrs.travel_month, "");
        assert!(table.get("paris").is_none());
    }

    #[test]
    fn test_missing_columns_read_empty() {
        let table = AttributeTable::from_reader("query,travel_month\nq,2024-01\n".as_bytes()).unwrap();
        let attrs = table.get("q").unwrap();
        assert_eq!(attrs.travel_month, "2024-01");
        assert_eq!(attrs.travel_city, "");
    }

    #[test]
    fn test_requires_query_column() {
        let err = AttributeTable::from_reader("name,travel_city\nq,Seoul\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MissingColumns { .. }));
    }

    #[test]
    fn test_repeated_query_last_wins() {
        let table =
            AttributeTable::from_reader("query,travel_city\nq,Seoul\nq,Busan\n".as_bytes()).unwrap();
        assert_eq!(table.get("q").unwrap().travel_city, "Busan");
    }

    #[test]
    fn test_choices() {
        let table = AttributeTable::from_reader(TABLE.as_bytes()).unwrap();
        let choices = table.choices();

        let cities: Vec<&str> = choices.travel_city_code.iter().map(|c| c.display.as_str()).collect();
        assert_eq!(cities, vec!["OSA(Osaka)", "TYO(Tokyo)"]);
        assert_eq!(choices.travel_country_code.len(), 1);
        assert_eq!(choices.travel_country_code[0].name, "Japan");
        assert_eq!(choices.travel_ptn, vec!["flight", "hotel", "trip"]);
        assert_eq!(choices.travel_month, vec!["2024-05", "2024-06"]);
    }

    #[test]
    fn test_attribute_serialization_names() {
        let attrs = QueryAttributes {
            travel_city_code: "TYO".to_string(),
            ..QueryAttributes::default()
        };
        let value = serde_json::to_value(&attrs).unwrap();
        assert_eq!(value["travel_cityCode"], "TYO");
        assert_eq!(value["travel_city"], "");
    }
}
