//! Turning uploaded files into normalized rows.
//!
//! Source headers are matched loosely: each header is lowercased and
//! stripped of whitespace, then tested against these rules in order (the
//! first matching rule decides the field):
//!
//! | Rule                                            | Field     |
//! |-------------------------------------------------|-----------|
//! | contains `query`                                | `query`   |
//! | contains `period`                               | `period`  |
//! | contains `area_sc` or `areasc`, or equals `sc`  | `area_sc` |
//! | equals `area_cc` or `areacc`                    | `area_cc` |
//! | contains `sr_area`, `srarea` or `sr`            | `sr_area` |
//!
//! When several headers map to the same field the leftmost one is used.
//! Rows with an empty query are dropped and counted. A metric cell that is
//! blank or not a finite, non-negative number reads as zero.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{NormalizedBatch, NormalizedRow};

/// Decodable upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    /// An array of objects, one per row.
    Json,
}

impl SourceFormat {
    /// Pick a format from a file name's extension.
    pub fn from_filename(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "json" => Ok(SourceFormat::Json),
            "xlsx" | "xls" => Err(Error::UnsupportedFormat(format!(
                "{name}: spreadsheet workbooks are not supported, export the sheet as CSV"
            ))),
            "" => Err(Error::UnsupportedFormat(format!("{name}: missing file extension"))),
            other => Err(Error::UnsupportedFormat(format!("{name}: .{other}"))),
        }
    }
}

/// A normalized field a source column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Query,
    Period,
    AreaSc,
    AreaCc,
    SrArea,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Query => "query",
            Field::Period => "period",
            Field::AreaSc => "area_sc",
            Field::AreaCc => "area_cc",
            Field::SrArea => "sr_area",
        }
    }
}

/// Map a source header to a field, if it matches any rule.
pub fn classify_header(header: &str) -> Option<Field> {
    let key: String = header
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    if key.contains("query") {
        Some(Field::Query)
    } else if key.contains("period") {
        Some(Field::Period)
    } else if key.contains("area_sc") || key.contains("areasc") || key == "sc" {
        Some(Field::AreaSc)
    } else if key == "area_cc" || key == "areacc" {
        Some(Field::AreaCc)
    } else if key.contains("sr_area") || key.contains("srarea") || key.contains("sr") {
        Some(Field::SrArea)
    } else {
        None
    }
}

/// Strip surrounding quotes, commas and whitespace from a query string.
pub fn clean_query(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '"' || c == '\'' || c == ',' || c.is_whitespace())
}

/// Parse a metric cell. Blank, non-numeric, non-finite and negative values
/// read as zero.
pub fn parse_metric(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value,
        _ => 0.0,
    }
}

/// Column index of each field in a decoded table.
#[derive(Debug, Default)]
struct ColumnMap {
    query: Option<usize>,
    period: Option<usize>,
    area_sc: Option<usize>,
    area_cc: Option<usize>,
    sr_area: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Result<Self> {
        let mut map = ColumnMap::default();
        for (i, header) in headers.iter().enumerate() {
            let slot = match classify_header(header) {
                Some(Field::Query) => &mut map.query,
                Some(Field::Period) => &mut map.period,
                Some(Field::AreaSc) => &mut map.area_sc,
                Some(Field::AreaCc) => &mut map.area_cc,
                Some(Field::SrArea) => &mut map.sr_area,
                None => continue,
            };
            slot.get_or_insert(i);
        }

        let missing: Vec<&'static str> = [
            (Field::Query, map.query),
            (Field::AreaSc, map.area_sc),
            (Field::AreaCc, map.area_cc),
        ]
        .into_iter()
        .filter(|(_, col)| col.is_none())
        .map(|(field, _)| field.name())
        .collect();

        if !missing.is_empty() {
            return Err(Error::MissingColumns {
                missing,
                available: headers.to_vec(),
            });
        }
        Ok(map)
    }

    fn row(&self, cells: &[String]) -> Option<NormalizedRow> {
        let cell = |col: Option<usize>| col.and_then(|i| cells.get(i)).map_or("", String::as_str);

        let query = clean_query(cell(self.query));
        if query.is_empty() {
            return None;
        }
        Some(NormalizedRow {
            query: query.to_string(),
            period: cell(self.period).trim().to_string(),
            area_sc: parse_metric(cell(self.area_sc)),
            area_cc: parse_metric(cell(self.area_cc)),
            sr_area: cell(self.sr_area).trim().to_string(),
        })
    }
}

/// A decoded source: headers and string cells.
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Decode and normalize an uploaded file.
pub fn normalize_bytes(bytes: &[u8], format: SourceFormat) -> Result<NormalizedBatch> {
    let table = match format {
        SourceFormat::Csv => decode_csv(bytes)?,
        SourceFormat::Json => decode_json(bytes)?,
    };
    normalize_table(table)
}

/// Read and normalize a file from disk, picking the format from its name.
pub fn normalize_file<P: AsRef<Path>>(path: P) -> Result<NormalizedBatch> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = SourceFormat::from_filename(&name)?;
    let bytes = std::fs::read(path)?;
    normalize_bytes(&bytes, format)
}

fn normalize_table(table: RawTable) -> Result<NormalizedBatch> {
    if table.rows.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let columns = ColumnMap::from_headers(&table.headers)?;

    let rows_parsed = table.rows.len();
    let rows: Vec<NormalizedRow> = table.rows.iter().filter_map(|r| columns.row(r)).collect();
    let rows_dropped = rows_parsed - rows.len();

    if rows_dropped > 0 {
        warn!("Dropped {} of {} rows with a missing query", rows_dropped, rows_parsed);
    }
    if rows.is_empty() {
        return Err(Error::EmptyBatch);
    }

    debug!(parsed = rows_parsed, usable = rows.len(), "Normalized upload");
    Ok(NormalizedBatch {
        rows,
        rows_parsed,
        rows_dropped,
    })
}

fn decode_csv(bytes: &[u8]) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, rows })
}

fn decode_json(bytes: &[u8]) -> Result<RawTable> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = value else {
        return Err(Error::InvalidInput(
            "JSON upload must be an array of row objects".to_string(),
        ));
    };

    let mut headers: Vec<String> = Vec::new();
    let mut objects = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(object) = item else {
            return Err(Error::InvalidInput(
                "JSON upload rows must be objects".to_string(),
            ));
        };
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
        objects.push(object);
    }

    let rows = objects
        .iter()
        .map(|object| {
            headers
                .iter()
                .map(|h| object.get(h).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(RawTable { headers, rows })
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
