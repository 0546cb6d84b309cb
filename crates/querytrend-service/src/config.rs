//! Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use querytrend_core::{CombineRule, DashboardOptions, FilterLimits};
use querytrend_store::{BackendKind, StorageOptions};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Upload handling.
    pub ingest: IngestConfig,
    /// Dashboard and filter tunables.
    pub analysis: AnalysisConfig,
    /// Query attribute table.
    pub attributes: AttributesConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use querytrend_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.ingest.validate());
        errors.extend(self.analysis.validate());
        errors.extend(self.attributes.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to persist with.
    pub backend: BackendKind,
    /// Data directory (JSON) or database file (SQLite). Defaults per backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// A serialized dataset above this size is refused.
    pub max_dataset_bytes: u64,
    /// Above this size the JSON backend writes compact JSON.
    pub pretty_limit_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let options = StorageOptions::default();
        Self {
            backend: BackendKind::default(),
            path: None,
            max_dataset_bytes: options.max_dataset_bytes,
            pretty_limit_bytes: options.pretty_limit_bytes,
        }
    }
}

impl StorageConfig {
    /// The configured path, or the platform default for the backend.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| querytrend_store::default_path(self.backend))
    }

    pub fn options(&self) -> StorageOptions {
        StorageOptions {
            max_dataset_bytes: self.max_dataset_bytes,
            pretty_limit_bytes: self.pretty_limit_bytes,
        }
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(path) = &self.path
            && path.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "storage.path",
                "storage path cannot be empty (omit it to use the default)",
            ));
        }
        if self.max_dataset_bytes == 0 {
            errors.push(ValidationError::new(
                "storage.max_dataset_bytes",
                "dataset size limit must be greater than 0",
            ));
        }

        errors
    }
}

/// Upload handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    /// Uploads waiting for the worker before new ones are refused.
    pub queue_capacity: usize,
    /// Job statuses retained for `/api/uploads`.
    pub job_history: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            queue_capacity: 16,
            job_history: 100,
        }
    }
}

impl IngestConfig {
    /// Validate ingest configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("ingest.max_upload_bytes", self.max_upload_bytes),
            ("ingest.queue_capacity", self.queue_capacity),
            ("ingest.job_history", self.job_history),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }
        errors
    }
}

/// Dashboard and filter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Entries per leaderboard and growth list.
    pub leaderboard_size: usize,
    /// Minimum previous impressions for a query to appear in a growth list.
    pub growth_min_previous_sc: f64,
    /// Matching queries returned in detail by the filter endpoint.
    pub filter_result_limit: usize,
    /// Entries per filter distribution.
    pub distribution_limit: usize,
    /// How a query's weeks combine into a month.
    pub monthly_combine: CombineRule,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let dashboard = DashboardOptions::default();
        let filter = FilterLimits::default();
        Self {
            leaderboard_size: dashboard.leaderboard_size,
            growth_min_previous_sc: dashboard.growth_min_previous_sc,
            filter_result_limit: filter.result_limit,
            distribution_limit: filter.distribution_limit,
            monthly_combine: dashboard.monthly_combine,
        }
    }
}

impl AnalysisConfig {
    pub fn dashboard_options(&self) -> DashboardOptions {
        DashboardOptions {
            leaderboard_size: self.leaderboard_size,
            growth_min_previous_sc: self.growth_min_previous_sc,
            monthly_combine: self.monthly_combine,
        }
    }

    pub fn filter_limits(&self) -> FilterLimits {
        FilterLimits {
            result_limit: self.filter_result_limit,
            distribution_limit: self.distribution_limit,
        }
    }

    /// Validate analysis configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("analysis.leaderboard_size", self.leaderboard_size),
            ("analysis.filter_result_limit", self.filter_result_limit),
            ("analysis.distribution_limit", self.distribution_limit),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }
        if !self.growth_min_previous_sc.is_finite() || self.growth_min_previous_sc < 0.0 {
            errors.push(ValidationError::new(
                "analysis.growth_min_previous_sc",
                format!(
                    "threshold {} must be a non-negative number",
                    self.growth_min_previous_sc
                ),
            ));
        }
        errors
    }
}

/// Query attribute table configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    /// CSV file mapping queries to travel attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AttributesConfig {
    /// Validate attribute configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        match &self.path {
            Some(path) if path.as_os_str().is_empty() => vec![ValidationError::new(
                "attributes.path",
                "attribute table path cannot be empty (omit it to disable filtering)",
            )],
            _ => Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `ingest.queue_capacity`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("querytrend")
        .join("server.toml")
}
