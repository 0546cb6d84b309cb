//! REST API endpoints for querytrend-service.
//!
//! # Concurrency
//!
//! Read endpoints lock `state.store` only to take a snapshot handle of the
//! dataset, then build their view after releasing it. Dashboard and filter
//! views run on the blocking pool. Writes (period removal, log pruning) hold
//! the lock for the whole commit. Uploads never touch the store directly; they
//! are queued for the ingest worker.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors
//! return HTTP 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use querytrend_core::{
    AttributeTable, DashboardView, Dataset, FilterAnalysis, FilterChoices, FilterCriteria,
    SourceFormat, UploadRecord, analyze_filter, build_dashboard,
};
use querytrend_store::RemovalReport;

use crate::state::{AppState, AttributeError, IngestJob, JobInfo, SubmitError};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Stored data
        .route("/api/data", get(get_data))
        .route("/api/history", get(get_history))
        .route("/api/history/duplicates/{filename}", delete(prune_duplicates))
        .route("/api/remove-period/{period}", delete(remove_period))
        // Views
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/filter-data", get(get_filter_data))
        .route("/api/filter-analysis", post(filter_analysis))
        // Uploads
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/uploads", get(list_uploads))
        .route("/api/uploads/{id}", get(get_upload))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Full dataset with the upload log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse<'a> {
    pub success: bool,
    pub data: &'a Dataset,
    pub upload_history: &'a [UploadRecord],
    pub total_queries: usize,
    pub total_records: usize,
}

async fn get_data(State(state): State<Arc<AppState>>) -> Response {
    let (dataset, uploads) = {
        let store = state.store.lock().await;
        (store.snapshot(), store.uploads().to_vec())
    };

    Json(DataResponse {
        success: true,
        data: &dataset,
        upload_history: &uploads,
        total_queries: dataset.len(),
        total_records: dataset.total_records(),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub history: Vec<UploadRecord>,
}

async fn get_history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    let history = state.store.lock().await.uploads().to_vec();
    Json(HistoryResponse {
        success: true,
        history,
    })
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub success: bool,
    pub data: DashboardView,
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardResponse>, AppError> {
    let dataset = state.store.lock().await.snapshot();
    let options = state.config.analysis.dashboard_options();

    let data = tokio::task::spawn_blocking(move || build_dashboard(&dataset, &options))
        .await
        .map_err(|e| AppError::Internal(format!("Dashboard task failed: {}", e)))?;

    Ok(Json(DashboardResponse {
        success: true,
        data,
    }))
}

/// Choices offered by the filter form.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDataResponse {
    pub success: bool,
    pub data: FilterData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterData {
    pub filter_options: FilterChoices,
    /// Queries with attributes.
    pub total_codes: usize,
}

async fn get_filter_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FilterDataResponse>, AppError> {
    let table = load_attributes(Arc::clone(&state)).await?.map_err(|e| {
        AppError::NotFound(e.to_string())
    })?;

    Ok(Json(FilterDataResponse {
        success: true,
        data: FilterData {
            filter_options: table.choices(),
            total_codes: table.len(),
        },
    }))
}

/// Filter analysis request body.
#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub filters: Option<FilterCriteria>,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub success: bool,
    /// True when no attribute table could be read, so nothing matched a constraint.
    pub degraded: bool,
    pub data: FilterAnalysis,
}

async fn filter_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<FilterResponse>, AppError> {
    let criteria = request
        .filters
        .ok_or_else(|| AppError::BadRequest("Request body must contain 'filters'".to_string()))?;

    let (table, degraded) = match load_attributes(Arc::clone(&state)).await? {
        Ok(table) => (table, false),
        Err(e) => {
            warn!("Filter analysis without attributes: {}", e);
            (AttributeTable::empty(), true)
        }
    };

    let dataset = state.store.lock().await.snapshot();
    let limits = state.config.analysis.filter_limits();
    let data = tokio::task::spawn_blocking(move || {
        analyze_filter(&dataset, &table, &criteria, limits)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Filter task failed: {}", e)))?;

    Ok(Json(FilterResponse {
        success: true,
        degraded,
        data,
    }))
}

async fn load_attributes(
    state: Arc<AppState>,
) -> Result<Result<AttributeTable, AttributeError>, AppError> {
    tokio::task::spawn_blocking(move || state.attribute_table())
        .await
        .map_err(|e| AppError::Internal(format!("Attribute task failed: {}", e)))
}

#[derive(Debug, Serialize)]
pub struct RemovalResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: RemovalReport,
}

async fn remove_period(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
) -> Result<Json<RemovalResponse>, AppError> {
    let report = state.store.lock().await.remove_period(&period)?;
    Ok(Json(RemovalResponse {
        success: true,
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub success: bool,
    pub removed: usize,
}

async fn prune_duplicates(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<PruneResponse>, AppError> {
    let removed = state
        .store
        .lock()
        .await
        .prune_duplicate_uploads(&filename)?;
    Ok(Json(PruneResponse {
        success: true,
        removed,
    }))
}

/// Accepted upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub message: String,
}

/// Accept a multipart upload and queue it.
///
/// The first part carrying a file name is used, whatever its field name.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let limit = state.config.ingest.max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let format = SourceFormat::from_filename(&filename)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let mut buffer = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
        {
            if buffer.len() + chunk.len() > limit {
                return Err(AppError::PayloadTooLarge(format!(
                    "File exceeds the {} byte upload limit",
                    limit
                )));
            }
            buffer.extend_from_slice(&chunk);
        }
        if buffer.is_empty() {
            return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
        }

        let job = IngestJob::new(filename.clone(), format, Bytes::from(buffer));
        let job_id = state.submit(job).await.map_err(|e| match e {
            SubmitError::QueueFull | SubmitError::Closed => {
                AppError::ServiceUnavailable(e.to_string())
            }
        })?;
        info!(%job_id, filename = %filename, "Upload queued");

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                success: true,
                job_id,
                message: format!("{} queued for processing", filename),
            }),
        ));
    }

    Err(AppError::BadRequest("No file was uploaded".to_string()))
}

#[derive(Debug, Serialize)]
pub struct UploadsResponse {
    pub success: bool,
    pub jobs: Vec<JobInfo>,
}

async fn list_uploads(State(state): State<Arc<AppState>>) -> Json<UploadsResponse> {
    Json(UploadsResponse {
        success: true,
        jobs: state.jobs.list().await,
    })
}

async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest(format!("Invalid job id: {}", id)))?;
    state
        .jobs
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Upload job not found: {}", id)))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Store(querytrend_store::Error),
    Internal(String),
}

impl From<querytrend_store::Error> for AppError {
    fn from(e: querytrend_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
