//! Upload ingestion and HTTP REST API for querytrend.
//!
//! This crate provides a service that:
//! - Accepts CSV/JSON exports of weekly search-query metrics
//! - Merges them into the stored per-query history through a single worker
//! - Serves the history, leaderboards and filtered views as JSON
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/data` - Full dataset with the upload log
//! - `GET /api/history` - Upload log, oldest first
//! - `GET /api/dashboard` - Weekly/monthly leaderboards and growth lists
//! - `GET /api/filter-data` - Filter choices from the attribute table
//! - `POST /api/filter-analysis` - Aggregates for queries matching a filter
//! - `DELETE /api/remove-period/{period}` - Remove a period everywhere
//! - `DELETE /api/history/duplicates/{filename}` - Drop repeated log entries
//! - `POST /upload` - Queue a multipart upload (responds 202)
//! - `GET /api/uploads`, `GET /api/uploads/{id}` - Upload job status
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/querytrend/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [storage]
//! backend = "json"          # or "sqlite"
//! path = "/var/lib/querytrend"
//!
//! [ingest]
//! max_upload_bytes = 52428800
//! queue_capacity = 16
//!
//! [analysis]
//! leaderboard_size = 50
//! growth_min_previous_sc = 300.0
//! monthly_combine = "reconcile"   # or "sum"
//!
//! [attributes]
//! path = "/var/lib/querytrend/query_codes.csv"
//! ```

pub mod api;
pub mod config;
pub mod state;
pub mod worker;

pub use config::{
    AnalysisConfig, AttributesConfig, Config, ConfigError, IngestConfig, ServerConfig,
    StorageConfig,
};
pub use state::{AppState, IngestJob, JobInfo, JobStatus};
pub use worker::{IngestError, IngestWorker, ingest_file};
