//! JSON file backend.
//!
//! State lives in two files inside a data directory:
//!
//! - `weekly_data.json`: the dataset, keyed by query.
//! - `upload_history.json`: the upload log, oldest first.
//!
//! Every file is replaced by writing a uniquely named sibling `.tmp` file,
//! syncing it and renaming it over the original, so a crash mid-write never
//! leaves a truncated file behind. Both payloads are fully serialized before
//! the first byte touches disk. The files being replaced are kept as `.bak`
//! siblings until every rename has succeeded; if one fails, the earlier ones
//! are rolled back so a commit lands on both files or on neither.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use querytrend_core::{Dataset, UploadRecord};

use crate::backend::{Backend, Commit, StorageOptions};
use crate::error::{Error, Result};

/// File name of the dataset inside the data directory.
pub const DATASET_FILE: &str = "weekly_data.json";
/// File name of the upload log inside the data directory.
pub const UPLOADS_FILE: &str = "upload_history.json";

/// Backend storing JSON files in a directory.
#[derive(Debug)]
pub struct JsonBackend {
    dir: PathBuf,
    options: StorageOptions,
}

impl JsonBackend {
    /// Open a data directory, creating it if needed.
    pub fn open<P: AsRef<Path>>(dir: P, options: StorageOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| Error::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        info!("Using JSON data directory {}", dir.display());
        Ok(Self { dir, options })
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.dir.join(DATASET_FILE)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.dir.join(UPLOADS_FILE)
    }

    /// Serialize the dataset, honouring the size limits.
    fn encode_dataset(&self, dataset: &Dataset) -> Result<Vec<u8>> {
        let compact = serde_json::to_vec(dataset)?;
        let size = compact.len() as u64;

        if size > self.options.max_dataset_bytes {
            return Err(Error::SizeLimit {
                size,
                limit: self.options.max_dataset_bytes,
            });
        }
        if size > self.options.pretty_limit_bytes {
            debug!(size, "Dataset above pretty-print limit, writing compact JSON");
            return Ok(compact);
        }
        Ok(serde_json::to_vec_pretty(dataset)?)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path).map_err(|e| Error::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn encode_pretty<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

static SIBLING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A sibling of `path` named `<file>.<tag>.<pid>.<nanos>.<seq>`, unique per
/// process and call.
fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".{}.{}.{}.{}",
        tag,
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos(),
        SIBLING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

/// Write `bytes` to a temporary sibling of `path` and flush it to disk.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let tmp = sibling_path(path, "tmp");
    let write = |tmp: &Path| -> std::io::Result<()> {
        let mut file = File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    write(&tmp).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::Write {
            path: tmp.clone(),
            source: e,
        }
    })?;
    Ok(tmp)
}

/// Keep the current contents of `path` under a backup name, if it is a file.
///
/// The original stays in place; the backup is a hard link where possible.
fn back_up(path: &Path) -> Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let backup = sibling_path(path, "bak");
    fs::hard_link(path, &backup)
        .or_else(|_| fs::copy(path, &backup).map(|_| ()))
        .map_err(|e| Error::Write {
            path: backup.clone(),
            source: e,
        })?;
    Ok(Some(backup))
}

/// A staged file waiting to replace `path`.
struct Replacement {
    path: PathBuf,
    tmp: PathBuf,
    backup: Option<PathBuf>,
}

/// Move every staged file into place, or leave all targets as they were.
fn install(mut staged: Vec<Replacement>) -> Result<()> {
    for i in 0..staged.len() {
        match back_up(&staged[i].path) {
            Ok(backup) => staged[i].backup = backup,
            Err(e) => {
                abandon(&staged, 0);
                return Err(e);
            }
        }
    }

    for (installed, item) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(&item.tmp, &item.path) {
            warn!("Replacing {} failed, restoring previous files", item.path.display());
            abandon(&staged, installed);
            return Err(Error::Write {
                path: item.path.clone(),
                source: e,
            });
        }
        debug!("Wrote {}", item.path.display());
    }

    for item in &staged {
        if let Some(backup) = &item.backup {
            let _ = fs::remove_file(backup);
        }
    }
    Ok(())
}

/// Undo a partial install: the first `installed` targets get their backups
/// back (or are removed if they did not exist), everything else is discarded.
fn abandon(staged: &[Replacement], installed: usize) {
    for (i, item) in staged.iter().enumerate() {
        if i < installed {
            let restored = match &item.backup {
                Some(backup) => fs::rename(backup, &item.path),
                None => fs::remove_file(&item.path),
            };
            if let Err(e) = restored {
                error!("Failed to restore {}: {}", item.path.display(), e);
            }
        } else {
            let _ = fs::remove_file(&item.tmp);
            if let Some(backup) = &item.backup {
                let _ = fs::remove_file(backup);
            }
        }
    }
}

impl Backend for JsonBackend {
    fn load_dataset(&self) -> Result<Dataset> {
        let path = self.dataset_path();
        let dataset: Dataset = read_json(&path)?;
        debug!("Loaded {} queries from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    fn load_uploads(&self) -> Result<Vec<UploadRecord>> {
        read_json(&self.uploads_path())
    }

    fn commit(&mut self, commit: Commit<'_>) -> Result<()> {
        let mut payloads: Vec<(PathBuf, Vec<u8>)> = Vec::with_capacity(2);
        if let Some(dataset) = commit.dataset {
            payloads.push((self.dataset_path(), self.encode_dataset(dataset)?));
        }
        if let Some(uploads) = commit.uploads {
            payloads.push((self.uploads_path(), encode_pretty(uploads)?));
        }

        let mut staged: Vec<Replacement> = Vec::with_capacity(payloads.len());
        for (path, bytes) in &payloads {
            match stage(path, bytes) {
                Ok(tmp) => staged.push(Replacement {
                    path: path.clone(),
                    tmp,
                    backup: None,
                }),
                Err(e) => {
                    abandon(&staged, 0);
                    return Err(e);
                }
            }
        }

        install(staged)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querytrend_core::{PeriodRow, QuerySeries};
    use tempfile::TempDir;
    use time::macros::datetime;

    fn sample_dataset() -> Dataset {
        vec![(
            "hotel".to_string(),
            QuerySeries::from_rows(vec![
                PeriodRow::new("2024-01-01~2024-01-07", 100.0, 10.0, "a"),
                PeriodRow::new("2024-01-08~2024-01-14", 150.0, 20.0, "b"),
            ]),
        )]
        .into_iter()
        .collect()
    }

    fn sample_upload() -> UploadRecord {
        UploadRecord {
            timestamp: datetime!(2024-01-15 08:00 UTC),
            filename: "week2.csv".to_string(),
            records_added: 2,
            queries_processed: 1,
        }
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let backend = JsonBackend::open(dir.path().join("data"), StorageOptions::default()).unwrap();
        assert!(backend.load_dataset().unwrap().is_empty());
        assert!(backend.load_uploads().unwrap().is_empty());
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_commit_roundtrip_leaves_no_tmp_files() {
        let dir = TempDir::new().unwrap();
        let mut backend = JsonBackend::open(dir.path(), StorageOptions::default()).unwrap();
        let dataset = sample_dataset();
        let uploads = vec![sample_upload()];

        backend.commit(Commit::both(&dataset, &uploads)).unwrap();

        assert_eq!(backend.load_dataset().unwrap(), dataset);
        assert_eq!(backend.load_uploads().unwrap(), uploads);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(
            names.iter().all(|n| !n.contains(".tmp.") && !n.contains(".bak.")),
            "{names:?}"
        );
    }

    #[test]
    fn test_pretty_then_compact() {
        let dir = TempDir::new().unwrap();
        let dataset = sample_dataset();

        let mut pretty = JsonBackend::open(dir.path().join("p"), StorageOptions::default()).unwrap();
        pretty.commit(Commit::dataset(&dataset)).unwrap();
        let text = fs::read_to_string(pretty.dataset_path()).unwrap();
        assert!(text.contains('\n'));

        let options = StorageOptions {
            pretty_limit_bytes: 10,
            ..StorageOptions::default()
        };
        let mut compact = JsonBackend::open(dir.path().join("c"), options).unwrap();
        compact.commit(Commit::dataset(&dataset)).unwrap();
        let text = fs::read_to_string(compact.dataset_path()).unwrap();
        assert!(!text.contains('\n'));
        assert_eq!(compact.load_dataset().unwrap(), dataset);
    }

    #[test]
    fn test_size_limit_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let small: Dataset = vec![(
            "q".to_string(),
            QuerySeries::from_rows(vec![PeriodRow::new("", 1.0, 1.0, "")]),
        )]
        .into_iter()
        .collect();
        let limit = serde_json::to_vec(&small).unwrap().len() as u64;

        let options = StorageOptions {
            max_dataset_bytes: limit,
            ..StorageOptions::default()
        };
        let mut backend = JsonBackend::open(dir.path(), options).unwrap();
        backend.commit(Commit::dataset(&small)).unwrap();

        let uploads = vec![sample_upload()];
        let err = backend
            .commit(Commit::both(&sample_dataset(), &uploads))
            .unwrap_err();
        assert!(matches!(err, Error::SizeLimit { limit: l, .. } if l == limit));

        assert_eq!(backend.load_dataset().unwrap(), small);
        assert!(backend.load_uploads().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let backend = JsonBackend::open(dir.path(), StorageOptions::default()).unwrap();
        fs::write(backend.dataset_path(), "{\"hotel\": [").unwrap();

        let err = backend.load_dataset().unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_loads_legacy_wrapper() {
        let dir = TempDir::new().unwrap();
        let backend = JsonBackend::open(dir.path(), StorageOptions::default()).unwrap();
        fs::write(
            backend.dataset_path(),
            r#"{"data": {"hotel": {"periods": ["2024-01-01~2024-01-07"], "areaSc": [5], "areaCc": [1]}}}"#,
        )
        .unwrap();

        let dataset = backend.load_dataset().unwrap();
        assert_eq!(dataset.get("hotel").unwrap().sr_area(), &[String::new()]);
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_failed_rename_restores_previous_files() {
        let dir = TempDir::new().unwrap();
        let mut backend = JsonBackend::open(dir.path(), StorageOptions::default()).unwrap();
        let before: Dataset = vec![(
            "flight".to_string(),
            QuerySeries::from_rows(vec![PeriodRow::new("2024-01-01~2024-01-07", 5.0, 1.0, "")]),
        )]
        .into_iter()
        .collect();
        backend.commit(Commit::dataset(&before)).unwrap();

        // A non-empty directory where the upload log should go makes its rename fail.
        let blocker = backend.uploads_path();
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let uploads = vec![sample_upload()];
        let err = backend
            .commit(Commit::both(&sample_dataset(), &uploads))
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));

        assert_eq!(backend.load_dataset().unwrap(), before);
        assert_eq!(file_names(dir.path()), vec![UPLOADS_FILE, DATASET_FILE]);

        fs::remove_dir_all(&blocker).unwrap();
        assert!(backend.load_uploads().unwrap().is_empty());
    }

    #[test]
    fn test_failed_rename_removes_new_file() {
        let dir = TempDir::new().unwrap();
        let mut backend = JsonBackend::open(dir.path(), StorageOptions::default()).unwrap();

        let blocker = backend.uploads_path();
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let uploads = vec![sample_upload()];
        assert!(backend.commit(Commit::both(&sample_dataset(), &uploads)).is_err());
        assert_eq!(file_names(dir.path()), vec![UPLOADS_FILE]);
        assert!(backend.load_dataset().unwrap().is_empty());
    }

    #[test]
    fn test_sibling_paths_are_unique() {
        let path = Path::new("/data/weekly_data.json");
        let first = sibling_path(path, "tmp");
        let second = sibling_path(path, "tmp");

        assert_eq!(first.parent(), Some(Path::new("/data")));
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("weekly_data.json.tmp.{}.", std::process::id())));
        assert_ne!(first, second);
    }
}
