//! SQLite backend.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use querytrend_core::{Dataset, PeriodRow, QuerySeries, UploadRecord};

use crate::backend::{Backend, Commit};
use crate::error::{Error, Result};
use crate::schema;

/// Backend storing the dataset and upload log in one SQLite database.
///
/// Each commit runs in a single transaction that replaces the affected
/// tables, so readers never see a half-written dataset.
pub struct SqliteBackend {
    conn: Connection,
    label: String,
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self {
            conn,
            label: format!("sqlite:{}", path.display()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            label: "sqlite::memory:".to_string(),
        })
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> Result<String> {
    timestamp
        .format(&Rfc3339)
        .map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

fn parse_timestamp(text: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|e| Error::InvalidTimestamp(format!("{text}: {e}")))
}

impl Backend for SqliteBackend {
    fn load_dataset(&self) -> Result<Dataset> {
        let mut stmt = self.conn.prepare(
            "SELECT query, period, area_sc, area_cc, sr_area
             FROM series_points ORDER BY query, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                PeriodRow {
                    period: row.get(1)?,
                    area_sc: row.get(2)?,
                    area_cc: row.get(3)?,
                    sr_area: row.get(4)?,
                },
            ))
        })?;

        let mut grouped: BTreeMap<String, Vec<PeriodRow>> = BTreeMap::new();
        for row in rows {
            let (query, point) = row?;
            grouped.entry(query).or_default().push(point);
        }

        let dataset: Dataset = grouped
            .into_iter()
            .map(|(query, rows)| (query, QuerySeries::from_rows(rows)))
            .collect();
        debug!("Loaded {} queries from {}", dataset.len(), self.label);
        Ok(dataset)
    }

    fn load_uploads(&self) -> Result<Vec<UploadRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT uploaded_at, filename, records_added, queries_processed
             FROM uploads ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut uploads = Vec::new();
        for row in rows {
            let (uploaded_at, filename, records_added, queries_processed) = row?;
            uploads.push(UploadRecord {
                timestamp: parse_timestamp(&uploaded_at)?,
                filename,
                records_added: records_added.max(0) as usize,
                queries_processed: queries_processed.max(0) as usize,
            });
        }
        Ok(uploads)
    }

    fn commit(&mut self, commit: Commit<'_>) -> Result<()> {
        let tx = self.conn.transaction()?;

        if let Some(dataset) = commit.dataset {
            tx.execute("DELETE FROM series_points", [])?;
            let mut insert = tx.prepare(
                "INSERT INTO series_points (query, position, period, area_sc, area_cc, sr_area)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (query, series) in dataset {
                for (position, point) in series.points().enumerate() {
                    insert.execute(params![
                        query,
                        position as i64,
                        point.period,
                        point.area_sc,
                        point.area_cc,
                        point.sr_area,
                    ])?;
                }
            }
        }

        if let Some(uploads) = commit.uploads {
            tx.execute("DELETE FROM uploads", [])?;
            let mut insert = tx.prepare(
                "INSERT INTO uploads (uploaded_at, filename, records_added, queries_processed)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for upload in uploads {
                insert.execute(params![
                    format_timestamp(upload.timestamp)?,
                    upload.filename,
                    upload.records_added as i64,
                    upload.queries_processed as i64,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Committed to {}", self.label);
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
