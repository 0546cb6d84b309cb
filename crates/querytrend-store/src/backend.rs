//! Storage backends.
//!
//! A backend persists two things: the [`Dataset`] and the upload log. Each
//! [`Backend::commit`] must be all-or-nothing from the point of view of a
//! later load; the previously committed state stays readable if it fails.

use serde::{Deserialize, Serialize};

use querytrend_core::{Dataset, UploadRecord};

use crate::error::Result;

/// Which backend to persist with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON files in a data directory.
    #[default]
    Json,
    /// A single SQLite database file.
    Sqlite,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Json => write!(f, "json"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Size limits applied when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// A serialized dataset above this size is refused.
    pub max_dataset_bytes: u64,
    /// Above this size the dataset is written compact instead of pretty.
    pub pretty_limit_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            max_dataset_bytes: 512 * 1024 * 1024,
            pretty_limit_bytes: 100 * 1024 * 1024,
        }
    }
}

/// The parts of the state to replace in one commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Commit<'a> {
    pub dataset: Option<&'a Dataset>,
    pub uploads: Option<&'a [UploadRecord]>,
}

impl<'a> Commit<'a> {
    pub fn dataset(dataset: &'a Dataset) -> Self {
        Self {
            dataset: Some(dataset),
            uploads: None,
        }
    }

    pub fn uploads(uploads: &'a [UploadRecord]) -> Self {
        Self {
            dataset: None,
            uploads: Some(uploads),
        }
    }

    pub fn both(dataset: &'a Dataset, uploads: &'a [UploadRecord]) -> Self {
        Self {
            dataset: Some(dataset),
            uploads: Some(uploads),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_none() && self.uploads.is_none()
    }
}

/// Durable persistence for the dataset and upload log.
pub trait Backend: Send {
    /// Load the dataset, repairing it on the way in. Missing state is empty.
    fn load_dataset(&self) -> Result<Dataset>;

    /// Load the upload log, oldest first. Missing state is empty.
    fn load_uploads(&self) -> Result<Vec<UploadRecord>>;

    /// Replace the given parts of the persisted state.
    fn commit(&mut self, commit: Commit<'_>) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Non-durable backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    dataset: Dataset,
    uploads: Vec<UploadRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn load_dataset(&self) -> Result<Dataset> {
        Ok(self.dataset.clone())
    }

    fn load_uploads(&self) -> Result<Vec<UploadRecord>> {
        Ok(self.uploads.clone())
    }

    fn commit(&mut self, commit: Commit<'_>) -> Result<()> {
        if let Some(dataset) = commit.dataset {
            self.dataset = dataset.clone();
        }
        if let Some(uploads) = commit.uploads {
            self.uploads = uploads.to_vec();
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
