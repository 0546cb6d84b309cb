//! Durable storage for querytrend datasets and upload history.
//!
//! A [`Store`] owns the per-query [`Dataset`](querytrend_core::Dataset) and
//! the append-only upload log. It is the only writer: merges, period removal
//! and repairs all go through it, and each one is committed through a
//! [`Backend`] before the in-memory copy changes.
//!
//! # Backends
//!
//! - [`JsonBackend`]: two JSON files in a data directory, replaced atomically.
//! - [`SqliteBackend`]: a single SQLite database, one transaction per commit.
//! - [`MemoryBackend`]: nothing durable, for tests.
//!
//! # Example
//!
//! ```no_run
//! use querytrend_core::{analyze, normalize_file};
//! use querytrend_store::{BackendKind, Store};
//!
//! let mut store = Store::open_default(BackendKind::Json)?;
//! let batch = analyze(normalize_file("week1.csv")?);
//! let report = store.merge_batch(&batch, "week1.csv")?;
//! println!("{} queries stored", report.total_queries);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod backend;
mod error;
pub mod json;
mod models;
mod schema;
mod sqlite;
mod store;

pub use backend::{Backend, BackendKind, Commit, MemoryBackend, StorageOptions};
pub use error::{Error, Result};
pub use json::JsonBackend;
pub use models::{MergeReport, RemovalReport, StoreStats};
pub use sqlite::SqliteBackend;
pub use store::Store;

/// Default data directory following platform conventions.
///
/// - Linux: `~/.local/share/querytrend`
/// - macOS: `~/Library/Application Support/querytrend`
/// - Windows: `C:\Users\<user>\AppData\Local\querytrend`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("querytrend")
}

/// Default storage path for a backend: the data directory itself for JSON,
/// `querytrend.db` inside it for SQLite.
pub fn default_path(kind: BackendKind) -> std::path::PathBuf {
    match kind {
        BackendKind::Json => default_data_dir(),
        BackendKind::Sqlite => default_data_dir().join("querytrend.db"),
    }
}
