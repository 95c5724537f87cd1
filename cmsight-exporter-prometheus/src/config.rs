//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use cmsight_common::{ConnectionConfig, LoggingConfig};

use crate::catalog::ModuleSpec;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Cloudera Manager connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Scrape timing and concurrency.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Module and metric filtering.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Additional modules declared in configuration.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9200").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name namespace (default: "cloudera").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    "0.0.0.0:9200".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "cloudera".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

/// Scrape timing, concurrency and scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Timeout of a single upstream query (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deadline for one whole scrape (seconds).
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// How many modules may scrape at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Restrict every query to this cluster.
    #[serde(default)]
    pub cluster: Option<String>,

    /// Expose per-module success/error counts as metrics.
    #[serde(default = "default_expose_module_stats")]
    pub expose_module_stats: bool,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_scrape_timeout() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

fn default_expose_module_stats() -> bool {
    true
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            scrape_timeout_secs: default_scrape_timeout(),
            max_concurrency: default_max_concurrency(),
            cluster: None,
            expose_module_stats: default_expose_module_stats(),
        }
    }
}

impl ScrapeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

/// Module and metric filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Only run these modules (empty = all).
    #[serde(default)]
    pub include_modules: Vec<String>,

    /// Never run these modules.
    #[serde(default)]
    pub exclude_modules: Vec<String>,

    /// Glob patterns over fully-qualified metric names to leave out.
    #[serde(default)]
    pub exclude_metrics: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.scrape.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.scrape.scrape_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.scrape.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "max_concurrency must be > 0".to_string(),
            ));
        }

        if let Some(cluster) = &self.scrape.cluster
            && cluster.contains(['[', ']', '=', '"'])
        {
            return Err(ConfigError::Validation(format!(
                "Invalid cluster scope: {}",
                cluster
            )));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        for pattern in &self.filters.exclude_metrics {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid metric pattern '{}': {}", pattern, e))
            })?;
        }

        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Module name must not be empty".to_string(),
                ));
            }
            if module.bindings.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Module {} has no bindings",
                    module.name
                )));
            }
        }

        Ok(())
    }
}
