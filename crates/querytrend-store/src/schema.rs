//! SQLite schema.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// A database stamped with any other version is rejected.
pub fn initialize(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => {
            create_schema_v1(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(Error::SchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- One row per (query, period); position is the chronological index
        CREATE TABLE IF NOT EXISTS series_points (
            query TEXT NOT NULL,
            position INTEGER NOT NULL,
            period TEXT NOT NULL,
            area_sc REAL NOT NULL,
            area_cc REAL NOT NULL,
            sr_area TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (query, position)
        );

        -- Append-only upload log, oldest first by id
        CREATE TABLE IF NOT EXISTS uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uploaded_at TEXT NOT NULL,
            filename TEXT NOT NULL,
            records_added INTEGER NOT NULL,
            queries_processed INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_uploads_filename ON uploads(filename);
        "#,
    )?;

    Ok(())
}
