//! querytrend service - upload ingestion and HTTP API.
//!
//! Run with: `cargo run -p querytrend-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use querytrend_core::build_dashboard;
use querytrend_service::{AppState, Config, IngestWorker, api, ingest_file};
use querytrend_store::{BackendKind, Store};

/// querytrend - merge weekly search-query exports and serve trend views.
#[derive(Parser, Debug)]
#[command(name = "querytrend-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "QUERYTREND_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true, env = "QUERYTREND_BIND")]
    bind: Option<String>,

    /// Storage backend (overrides config).
    #[arg(long, global = true, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Data directory or database file (overrides config).
    #[arg(short, long, global = true, env = "QUERYTREND_DATA")]
    data: Option<PathBuf>,

    /// Query attribute CSV (overrides config).
    #[arg(short, long, global = true, env = "QUERYTREND_ATTRIBUTES")]
    attributes: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service in the foreground (default behavior).
    Run,

    /// Merge local export files into the store.
    Import {
        /// CSV or JSON files, merged in the order given.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove a period label from every query.
    RemovePeriod {
        /// Exact label, e.g. `2024-01-01~2024-01-07`.
        period: String,
    },

    /// Keep only the latest upload-log entry for a file name.
    PruneDuplicates {
        filename: String,
    },

    /// Repair the stored dataset and write it back.
    Clean,

    /// Print the dashboard view as JSON.
    Dashboard,

    /// Print the upload log as JSON.
    History,
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "json" => Ok(BackendKind::Json),
        "sqlite" => Ok(BackendKind::Sqlite),
        other => Err(format!("unknown backend '{}': expected json or sqlite", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("querytrend_service=info".parse()?)
                .add_directive("querytrend_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Run) | None => run_server(config).await,
        Some(Command::Import { files }) => {
            let mut store = open_store(&config)?;
            for file in &files {
                match ingest_file(&mut store, file) {
                    Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                    Err(e) if e.is_empty_batch() => {
                        warn!("Skipped {}: {}", file.display(), e);
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("importing {}", file.display()));
                    }
                }
            }
            Ok(())
        }
        Some(Command::RemovePeriod { period }) => {
            let report = open_store(&config)?.remove_period(&period)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Command::PruneDuplicates { filename }) => {
            let removed = open_store(&config)?.prune_duplicate_uploads(&filename)?;
            println!("Removed {} duplicate entries for {}", removed, filename);
            Ok(())
        }
        Some(Command::Clean) => {
            let stats = open_store(&config)?.clean()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Some(Command::Dashboard) => {
            let store = open_store(&config)?;
            let view = build_dashboard(store.dataset(), &config.analysis.dashboard_options());
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Some(Command::History) => {
            let store = open_store(&config)?;
            println!("{}", serde_json::to_string_pretty(store.uploads())?);
            Ok(())
        }
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(backend) = args.backend {
        config.storage.backend = backend;
    }
    if let Some(data) = &args.data {
        config.storage.path = Some(data.clone());
    }
    if let Some(attributes) = &args.attributes {
        config.attributes.path = Some(attributes.clone());
    }

    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<Store> {
    let path = config.storage.resolved_path();
    let store = Store::open(config.storage.backend, &path, config.storage.options())
        .with_context(|| format!("opening {} store at {}", config.storage.backend, path.display()))?;
    Ok(store)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let addr: SocketAddr = config.server.bind.parse()?;

    let state = AppState::new(store, config);
    IngestWorker::new(Arc::clone(&state)).start().await;

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
