//! Configuration management
//!
//! TOML file support, environment variable overrides and defaults.

use crate::error::{Error, Result, ValidationError};
use crate::query::dispatcher::DispatcherConfig;
use crate::query::executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for `dispatcher.max_concurrent_queries`
pub const MAX_CONCURRENT_QUERIES_LIMIT: usize = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Batch dispatch settings
    #[serde(default)]
    pub dispatcher: DispatcherSection,

    /// Warehouse defaults
    #[serde(default)]
    pub warehouse: WarehouseSection,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatcherSection {
    /// Per-query deadline in milliseconds (0 = none)
    #[serde(default)]
    pub query_timeout_ms: u64,

    /// Bound on concurrent warehouse work (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_queries: usize,
}

/// Warehouse configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WarehouseSection {
    /// Project used when a query leaves `project` empty
    #[serde(default)]
    pub default_project: Option<String>,

    /// Location used when a query leaves `location` empty
    #[serde(default)]
    pub default_location: Option<String>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Print Prometheus metrics after each batch
    #[serde(default)]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Dispatcher
        if let Ok(timeout) = std::env::var("WAREHOUSE_SERIES_QUERY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.dispatcher.query_timeout_ms = ms;
            }
        }
        if let Ok(limit) = std::env::var("WAREHOUSE_SERIES_MAX_CONCURRENT_QUERIES") {
            if let Ok(n) = limit.parse() {
                self.dispatcher.max_concurrent_queries = n;
            }
        }

        // Warehouse
        if let Ok(project) = std::env::var("WAREHOUSE_SERIES_DEFAULT_PROJECT") {
            self.warehouse.default_project = Some(project);
        }
        if let Ok(location) = std::env::var("WAREHOUSE_SERIES_DEFAULT_LOCATION") {
            self.warehouse.default_location = Some(location);
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.max_concurrent_queries > MAX_CONCURRENT_QUERIES_LIMIT {
            return Err(ValidationError::OutOfRange {
                field: "dispatcher.max_concurrent_queries".to_string(),
                value: self.dispatcher.max_concurrent_queries.to_string(),
                min: "0".to_string(),
                max: MAX_CONCURRENT_QUERIES_LIMIT.to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("warehouse.default_project", &self.warehouse.default_project),
            ("warehouse.default_location", &self.warehouse.default_location),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(ValidationError::InvalidFormat {
                    field: field.to_string(),
                    message: "must not be blank when set".to_string(),
                }
                .into());
            }
        }

        if self.monitoring.log_level.trim().is_empty() {
            return Err(ValidationError::MissingField("monitoring.log_level".to_string()).into());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }

    /// Dispatcher settings in runtime form
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            query_timeout: (self.dispatcher.query_timeout_ms > 0)
                .then(|| Duration::from_millis(self.dispatcher.query_timeout_ms)),
            max_concurrent_queries: self.dispatcher.max_concurrent_queries,
        }
    }

    /// Executor settings in runtime form
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_project: self.warehouse.default_project.clone(),
            default_location: self.warehouse.default_location.clone(),
        }
    }
}
