//! Background ingest worker.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use querytrend_core::{AnalyzedBatch, SourceFormat, analyze, normalize_bytes, normalize_file};
use querytrend_store::{MergeReport, Store};

use crate::state::{AppState, IngestJob, JobStatus};

/// Single consumer of the ingest queue.
///
/// Jobs run strictly in submission order, one at a time.
pub struct IngestWorker {
    state: Arc<AppState>,
}

impl IngestWorker {
    /// Create a new worker.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start draining the queue in a background task.
    ///
    /// Returns immediately. Does nothing if a worker already owns the queue.
    pub async fn start(&self) {
        let Some(mut rx) = self.state.take_receiver().await else {
            warn!("Ingest worker already running");
            return;
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            info!("Ingest worker started");
            while let Some(job) = rx.recv().await {
                process_job(&state, job).await;
            }
            info!("Ingest queue closed, worker stopping");
        });
    }
}

/// Run one job through parse, analysis and merge, recording its status.
pub async fn process_job(state: &AppState, job: IngestJob) {
    let IngestJob {
        id,
        filename,
        format,
        bytes,
    } = job;
    state.jobs.start(id).await;
    info!(%id, filename = %filename, size = bytes.len(), "Processing upload");

    let parsed = tokio::task::spawn_blocking(move || parse_upload(&bytes, format)).await;

    let result = match parsed {
        Ok(Ok(batch)) => {
            let mut store = state.store.lock().await;
            merge(&mut store, &batch, &filename)
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(IngestError::Task(e.to_string())),
    };

    let status = match result {
        Ok(report) => {
            info!(
                %id,
                filename = %filename,
                inserted = report.summary.queries_inserted,
                updated = report.summary.queries_updated,
                "Upload merged"
            );
            JobStatus::Completed { report }
        }
        Err(e) if e.is_empty_batch() => {
            warn!(%id, filename = %filename, "Upload skipped: {}", e);
            JobStatus::Skipped {
                reason: e.to_string(),
            }
        }
        Err(e) => {
            error!(%id, filename = %filename, "Upload failed: {}", e);
            JobStatus::Failed {
                error: e.to_string(),
            }
        }
    };

    state.jobs.finish(id, status).await;
}

fn parse_upload(bytes: &[u8], format: SourceFormat) -> Result<AnalyzedBatch, IngestError> {
    let batch = normalize_bytes(bytes, format).map_err(IngestError::Parse)?;
    Ok(analyze(batch))
}

fn merge(store: &mut Store, batch: &AnalyzedBatch, filename: &str) -> Result<MergeReport, IngestError> {
    store
        .merge_batch(batch, filename)
        .map_err(IngestError::Store)
}

/// Merge a local file synchronously, bypassing the queue.
///
/// The upload log records the file name without its directory.
pub fn ingest_file(store: &mut Store, path: &Path) -> Result<MergeReport, IngestError> {
    let batch = analyze(normalize_file(path).map_err(IngestError::Parse)?);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    merge(store, &batch, &filename)
}

/// Ingest errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to parse upload: {0}")]
    Parse(querytrend_core::Error),
    #[error("Failed to store upload: {0}")]
    Store(querytrend_store::Error),
    #[error("Ingest task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Returns true if the upload simply had nothing to merge.
    pub fn is_empty_batch(&self) -> bool {
        matches!(
            self,
            IngestError::Parse(querytrend_core::Error::EmptyBatch)
                | IngestError::Store(querytrend_store::Error::EmptyBatch)
        )
    }
}
