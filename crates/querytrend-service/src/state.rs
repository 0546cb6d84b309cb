//! Application state shared across handlers.
//!
//! The store sits behind a single async mutex. HTTP handlers take it only
//! long enough to clone a snapshot handle or apply one mutation; the ingest
//! worker holds it for the duration of a merge, so merges never interleave.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use querytrend_core::{AttributeTable, SourceFormat};
use querytrend_store::{MergeReport, Store};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for exclusive writes).
    pub store: Mutex<Store>,
    /// Configuration, fixed at startup.
    pub config: Config,
    /// Status of recent uploads.
    pub jobs: JobRegistry,
    ingest_tx: mpsc::Sender<IngestJob>,
    ingest_rx: Mutex<Option<mpsc::Receiver<IngestJob>>>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The ingest queue holds `config.ingest.queue_capacity` pending uploads.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest.queue_capacity.max(1));
        let jobs = JobRegistry::new(config.ingest.job_history);
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            jobs,
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
        })
    }

    /// Queue an upload for the worker and record it as queued.
    pub async fn submit(&self, job: IngestJob) -> Result<Uuid, SubmitError> {
        let info = JobInfo::queued(&job);
        let id = job.id;

        let permit = self.ingest_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => SubmitError::Closed,
        })?;
        self.jobs.insert(info).await;
        permit.send(job);
        Ok(id)
    }

    /// Hand the queue's receiving end to the worker. Only the first caller gets it.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<IngestJob>> {
        self.ingest_rx.lock().await.take()
    }

    #[cfg(test)]
    pub(crate) async fn restore_receiver(&self, rx: mpsc::Receiver<IngestJob>) {
        *self.ingest_rx.lock().await = Some(rx);
    }

    /// Load the configured attribute table.
    ///
    /// Read on every call so edits to the file show up without a restart.
    pub fn attribute_table(&self) -> Result<AttributeTable, AttributeError> {
        let path = self
            .config
            .attributes
            .path
            .as_ref()
            .ok_or(AttributeError::NotConfigured)?;
        AttributeTable::load(path).map_err(|e| AttributeError::Unavailable(e.to_string()))
    }
}

/// Why an upload could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Ingest queue is full, try again later")]
    QueueFull,
    #[error("Ingest worker is not running")]
    Closed,
}

/// Why the attribute table is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    #[error("No query attribute table is configured")]
    NotConfigured,
    #[error("Query attribute table is unavailable: {0}")]
    Unavailable(String),
}

/// An upload waiting for the worker.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub id: Uuid,
    pub filename: String,
    pub format: SourceFormat,
    pub bytes: Bytes,
}

impl IngestJob {
    pub fn new(filename: impl Into<String>, format: SourceFormat, bytes: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            format,
            bytes,
        }
    }
}

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed { report: MergeReport },
    /// Nothing to merge, e.g. every row was dropped.
    Skipped { reason: String },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed { .. } | JobStatus::Skipped { .. } | JobStatus::Failed { .. }
        )
    }
}

/// Status of one upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: Uuid,
    pub filename: String,
    pub size_bytes: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobInfo {
    fn queued(job: &IngestJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename.clone(),
            size_bytes: job.bytes.len(),
            submitted_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
            status: JobStatus::Queued,
        }
    }
}

/// Bounded record of recent uploads, oldest first.
///
/// When full, the oldest finished job is evicted first.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<VecDeque<JobInfo>>,
    capacity: usize,
}

impl JobRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn insert(&self, info: JobInfo) {
        let mut jobs = self.jobs.write().await;
        jobs.push_back(info);
        while jobs.len() > self.capacity {
            let evict = jobs
                .iter()
                .position(|j| j.status.is_finished())
                .unwrap_or(0);
            jobs.remove(evict);
        }
    }

    /// Move a job to `Processing`.
    pub async fn start(&self, id: Uuid) {
        self.update(id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(OffsetDateTime::now_utc());
        })
        .await;
    }

    /// Record a job's final status.
    pub async fn finish(&self, id: Uuid, status: JobStatus) {
        self.update(id, |job| {
            job.status = status;
            job.finished_at = Some(OffsetDateTime::now_utc());
        })
        .await;
    }

    async fn update<F: FnOnce(&mut JobInfo)>(&self, id: Uuid, f: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            f(job);
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    pub async fn list(&self) -> Vec<JobInfo> {
        self.jobs.read().await.iter().cloned().collect()
    }
}
