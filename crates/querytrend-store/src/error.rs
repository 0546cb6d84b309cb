//! Error types for querytrend-store.

use std::path::PathBuf;

/// Result type for querytrend-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in querytrend-store.
///
/// Any error returned from a mutating [`Store`](crate::Store) method leaves
/// the previously committed state in place.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create the storage directory.
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a data file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A data file exists but does not parse.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to write or replace a data file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The serialized dataset exceeds the configured limit.
    #[error("Serialized dataset is {size} bytes, above the {limit} byte limit")]
    SizeLimit { size: u64, limit: u64 },

    /// A merge was requested for a batch with no rows.
    #[error("Batch contains no data to merge")]
    EmptyBatch,

    /// The database was written by a different schema version.
    #[error("Unsupported database schema version {found} (expected {expected})")]
    SchemaVersion { found: i32, expected: i32 },

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
