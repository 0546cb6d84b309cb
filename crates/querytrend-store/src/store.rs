//! Main store implementation.

use std::path::Path;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use querytrend_core::{AnalyzedBatch, Dataset, UploadRecord};

use crate::backend::{Backend, BackendKind, Commit, MemoryBackend, StorageOptions};
use crate::error::{Error, Result};
use crate::json::JsonBackend;
use crate::models::{MergeReport, RemovalReport, StoreStats};
use crate::sqlite::SqliteBackend;

/// Owner of the dataset and upload log.
///
/// Every mutation builds the next state off to the side, commits it through
/// the backend and only then replaces the cached copy. A failed commit leaves
/// both the cache and the durable state as they were.
pub struct Store {
    backend: Box<dyn Backend>,
    dataset: Arc<Dataset>,
    uploads: Vec<UploadRecord>,
}

impl Store {
    /// Wrap a backend, loading its current state.
    pub fn with_backend(backend: Box<dyn Backend>) -> Result<Self> {
        let dataset = backend.load_dataset()?;
        let uploads = backend.load_uploads()?;
        info!(
            queries = dataset.len(),
            uploads = uploads.len(),
            "Opened store at {}",
            backend.describe()
        );
        Ok(Self {
            backend,
            dataset: Arc::new(dataset),
            uploads,
        })
    }

    /// Open a store of the given kind.
    ///
    /// `path` is the data directory for [`BackendKind::Json`] and the
    /// database file for [`BackendKind::Sqlite`].
    pub fn open<P: AsRef<Path>>(kind: BackendKind, path: P, options: StorageOptions) -> Result<Self> {
        match kind {
            BackendKind::Json => Self::open_json(path, options),
            BackendKind::Sqlite => Self::open_sqlite(path),
        }
    }

    /// Open a JSON data directory.
    pub fn open_json<P: AsRef<Path>>(dir: P, options: StorageOptions) -> Result<Self> {
        Self::with_backend(Box::new(JsonBackend::open(dir, options)?))
    }

    /// Open or create a SQLite database.
    pub fn open_sqlite<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_backend(Box::new(SqliteBackend::open(path)?))
    }

    /// Open a non-durable store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    /// Open the default location for the given backend.
    pub fn open_default(kind: BackendKind) -> Result<Self> {
        Self::open(kind, crate::default_path(kind), StorageOptions::default())
    }

    // === Reads ===

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// A shared handle on the current dataset, valid after the store moves on.
    pub fn snapshot(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset)
    }

    /// The upload log, oldest first.
    pub fn uploads(&self) -> &[UploadRecord] {
        &self.uploads
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_queries: self.dataset.len(),
            total_records: self.dataset.total_records(),
            uploads: self.uploads.len(),
        }
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Re-read the persisted state, replacing the cached copy.
    pub fn load(&mut self) -> Result<Arc<Dataset>> {
        let dataset = self.backend.load_dataset()?;
        let uploads = self.backend.load_uploads()?;
        self.dataset = Arc::new(dataset);
        self.uploads = uploads;
        Ok(self.snapshot())
    }

    // === Writes ===

    /// Replace the whole dataset.
    pub fn save(&mut self, dataset: Dataset) -> Result<()> {
        self.backend.commit(Commit::dataset(&dataset))?;
        debug!(queries = dataset.len(), "Saved dataset");
        self.dataset = Arc::new(dataset);
        Ok(())
    }

    /// Merge an analyzed upload and append its log entry in one commit.
    pub fn merge_batch(&mut self, batch: &AnalyzedBatch, filename: &str) -> Result<MergeReport> {
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut dataset = Dataset::clone(&self.dataset);
        let summary = querytrend_core::merge_batch(&mut dataset, batch);

        let upload = batch.upload_record(filename, OffsetDateTime::now_utc());
        let mut uploads = self.uploads.clone();
        uploads.push(upload.clone());

        self.backend.commit(Commit::both(&dataset, &uploads))?;

        let report = MergeReport {
            summary,
            upload,
            total_queries: dataset.len(),
            total_records: dataset.total_records(),
        };
        info!(
            filename,
            inserted = summary.queries_inserted,
            updated = summary.queries_updated,
            total_queries = report.total_queries,
            "Merged upload"
        );

        self.dataset = Arc::new(dataset);
        self.uploads = uploads;
        Ok(report)
    }

    /// Remove a period label from every series and prune matching log entries.
    pub fn remove_period(&mut self, period: &str) -> Result<RemovalReport> {
        let mut dataset = Dataset::clone(&self.dataset);
        let summary = querytrend_core::remove_period(&mut dataset, period);

        let mut uploads = self.uploads.clone();
        if !period.is_empty() {
            uploads.retain(|u| !u.filename.contains(period));
        }

        let report = RemovalReport {
            period: period.to_string(),
            removed_queries: summary.removed_queries,
            deleted_queries: summary.deleted_queries,
            removed_uploads: self.uploads.len() - uploads.len(),
            remaining_queries: dataset.len(),
        };

        if report.is_noop() {
            debug!(period, "Period not present, nothing to remove");
            return Ok(report);
        }

        self.backend.commit(Commit::both(&dataset, &uploads))?;
        info!(
            period,
            removed = report.removed_queries,
            deleted = report.deleted_queries,
            uploads = report.removed_uploads,
            "Removed period"
        );

        self.dataset = Arc::new(dataset);
        self.uploads = uploads;
        Ok(report)
    }

    /// Keep only the latest log entry for `filename`. Returns how many were removed.
    pub fn prune_duplicate_uploads(&mut self, filename: &str) -> Result<usize> {
        let Some(last) = self.uploads.iter().rposition(|u| u.filename == filename) else {
            return Ok(0);
        };

        let uploads: Vec<UploadRecord> = self
            .uploads
            .iter()
            .enumerate()
            .filter(|(i, u)| *i == last || u.filename != filename)
            .map(|(_, u)| u.clone())
            .collect();
        let removed = self.uploads.len() - uploads.len();
        if removed == 0 {
            return Ok(0);
        }

        self.backend.commit(Commit::uploads(&uploads))?;
        info!(filename, removed, "Pruned duplicate upload entries");
        self.uploads = uploads;
        Ok(removed)
    }

    /// Reload the persisted state, which repairs it, and write it back.
    pub fn clean(&mut self) -> Result<StoreStats> {
        let dataset = self.backend.load_dataset()?;
        let uploads = self.backend.load_uploads()?;
        self.backend.commit(Commit::both(&dataset, &uploads))?;

        self.dataset = Arc::new(dataset);
        self.uploads = uploads;
        let stats = self.stats();
        info!(
            queries = stats.total_queries,
            records = stats.total_records,
            "Rewrote cleaned store"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querytrend_core::{SourceFormat, analyze, normalize_bytes};
    use tempfile::TempDir;

    fn batch(csv: &str) -> AnalyzedBatch {
        analyze(normalize_bytes(csv.as_bytes(), SourceFormat::Csv).unwrap())
    }

    fn week1() -> AnalyzedBatch {
        batch(
            "query,period,area_sc,area_cc\n\
             hotel,2024-01-01~2024-01-07,100,10\n\
             flight,2024-01-01~2024-01-07,400,40\n",
        )
    }

    fn week2() -> AnalyzedBatch {
        batch(
            "query,period,area_sc,area_cc\n\
             hotel,2024-01-08~2024-01-14,150,20\n",
        )
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.dataset().is_empty());
        assert!(store.uploads().is_empty());
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[test]
    fn test_merge_batch_records_upload() {
        let mut store = Store::open_in_memory().unwrap();

        let report = store.merge_batch(&week1(), "week1.csv").unwrap();
        assert_eq!(report.summary.queries_inserted, 2);
        assert_eq!(report.upload.filename, "week1.csv");
        assert_eq!(report.upload.records_added, 2);

        let report = store.merge_batch(&week2(), "week2.csv").unwrap();
        assert_eq!(report.summary.queries_updated, 1);
        assert_eq!(report.total_records, 3);

        let hotel = store.dataset().get("hotel").unwrap();
        assert_eq!(hotel.sc_growth_rates(), &[0.0, 50.0]);
        assert_eq!(store.stats().uploads, 2);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .merge_batch(&AnalyzedBatch::default(), "empty.csv")
            .unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
        assert!(store.uploads().is_empty());
    }

    #[test]
    fn test_snapshot_survives_later_merges() {
        let mut store = Store::open_in_memory().unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();
        let before = store.snapshot();

        store.merge_batch(&week2(), "week2.csv").unwrap();
        assert_eq!(before.get("hotel").unwrap().len(), 1);
        assert_eq!(store.dataset().get("hotel").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_period_prunes_uploads() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .merge_batch(&week1(), "export_2024-01-01~2024-01-07.csv")
            .unwrap();
        store.merge_batch(&week2(), "week2.csv").unwrap();

        let report = store.remove_period("2024-01-01~2024-01-07").unwrap();
        assert_eq!(report.removed_queries, 2);
        assert_eq!(report.deleted_queries, 1);
        assert_eq!(report.removed_uploads, 1);
        assert_eq!(report.remaining_queries, 1);

        assert!(!store.dataset().contains("flight"));
        let hotel = store.dataset().get("hotel").unwrap();
        assert_eq!(hotel.periods(), &["2024-01-08~2024-01-14".to_string()]);
        assert_eq!(hotel.sc_growth_rates(), &[0.0]);
        assert_eq!(store.uploads().len(), 1);
    }

    #[test]
    fn test_remove_missing_period_is_noop() {
        let mut store = Store::open_in_memory().unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();

        let report = store.remove_period("1999-01-01~1999-01-07").unwrap();
        assert!(report.is_noop());
        assert_eq!(report.remaining_queries, 2);

        // An empty label never matches a filename.
        assert_eq!(store.remove_period("").unwrap().removed_uploads, 0);
        assert_eq!(store.uploads().len(), 1);
    }

    #[test]
    fn test_prune_duplicate_uploads_keeps_latest() {
        let mut store = Store::open_in_memory().unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();
        store.merge_batch(&week2(), "week2.csv").unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();

        assert_eq!(store.prune_duplicate_uploads("week1.csv").unwrap(), 2);
        let names: Vec<&str> = store.uploads().iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["week2.csv", "week1.csv"]);

        assert_eq!(store.prune_duplicate_uploads("week1.csv").unwrap(), 0);
        assert_eq!(store.prune_duplicate_uploads("missing.csv").unwrap(), 0);
    }

    #[test]
    fn test_json_store_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = Store::open(BackendKind::Json, dir.path(), StorageOptions::default()).unwrap();
            store.merge_batch(&week1(), "week1.csv").unwrap();
            store.merge_batch(&week2(), "week2.csv").unwrap();
        }

        let store = Store::open(BackendKind::Json, dir.path(), StorageOptions::default()).unwrap();
        assert_eq!(store.stats().total_queries, 2);
        assert_eq!(store.stats().uploads, 2);
        assert_eq!(
            store.dataset().get("hotel").unwrap().area_cc(),
            &[10.0, 20.0]
        );
    }

    #[test]
    fn test_sqlite_store_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("querytrend.db");
        {
            let mut store = Store::open(BackendKind::Sqlite, &path, StorageOptions::default()).unwrap();
            store.merge_batch(&week1(), "week1.csv").unwrap();
            store.remove_period("2024-01-01~2024-01-07").unwrap();
            store.merge_batch(&week2(), "week2.csv").unwrap();
        }

        let store = Store::open_sqlite(&path).unwrap();
        assert_eq!(store.stats().total_queries, 1);
        assert_eq!(store.uploads().len(), 2);
        assert!(store.describe().starts_with("sqlite:"));
    }

    #[test]
    fn test_failed_commit_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open_json(dir.path(), StorageOptions::default()).unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();

        let limit = serde_json::to_vec(store.dataset()).unwrap().len() as u64;
        let options = StorageOptions {
            max_dataset_bytes: limit,
            ..StorageOptions::default()
        };
        let mut store = Store::open_json(dir.path(), options).unwrap();

        let err = store.merge_batch(&week2(), "week2.csv").unwrap_err();
        assert!(matches!(err, Error::SizeLimit { .. }));
        assert_eq!(store.stats().total_records, 2);
        assert_eq!(store.uploads().len(), 1);

        store.load().unwrap();
        assert_eq!(store.stats().total_records, 2);
        assert_eq!(store.uploads().len(), 1);
    }

    #[test]
    fn test_failed_log_write_keeps_disk_state() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open_json(dir.path(), StorageOptions::default()).unwrap();

        let log = dir.path().join(crate::json::UPLOADS_FILE);
        std::fs::create_dir(&log).unwrap();
        std::fs::write(log.join("keep"), "x").unwrap();

        let err = store.merge_batch(&week1(), "week1.csv").unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(store.dataset().is_empty());

        std::fs::remove_dir_all(&log).unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.is_empty(), "{names:?}");

        let reopened = Store::open_json(dir.path(), StorageOptions::default()).unwrap();
        assert!(reopened.dataset().is_empty());
        assert!(reopened.uploads().is_empty());
    }

    #[test]
    fn test_clean_repairs_persisted_data() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(crate::json::DATASET_FILE),
            r#"{" hotel ": {"periods": ["2024-01-08~2024-01-14", "2024-01-01~2024-01-07", "2024-01-01~2024-01-07"],
                "areaSc": [150, 100, 80], "areaCc": [20, 10, 5]}}"#,
        )
        .unwrap();

        let mut store = Store::open_json(dir.path(), StorageOptions::default()).unwrap();
        let stats = store.clean().unwrap();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.total_records, 2);

        let reopened = Store::open_json(dir.path(), StorageOptions::default()).unwrap();
        let hotel = reopened.dataset().get("hotel").unwrap();
        assert_eq!(hotel.area_sc(), &[100.0, 150.0]);
        assert_eq!(hotel.area_cc(), &[15.0, 20.0]);
        assert_eq!(hotel.sr_area(), &[String::new(), String::new()]);
    }

    #[test]
    fn test_save_replaces_dataset() {
        let mut store = Store::open_in_memory().unwrap();
        store.merge_batch(&week1(), "week1.csv").unwrap();
        store.save(Dataset::new()).unwrap();
        assert!(store.dataset().is_empty());
        assert_eq!(store.load().unwrap().len(), 0);
        assert_eq!(store.uploads().len(), 1);
    }
}
