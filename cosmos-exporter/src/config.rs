//! Configuration for the Cosmos exporter.

use cosmos_exporter_common::{Bech32Config, LoggingConfig, load_config, parse_config};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::denom::DenomOverrides;

/// Configuration errors.
///
/// Covers both file-level problems and denomination settings that cannot
/// be satisfied once checked against the node.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] cosmos_exporter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("ambiguous denom scaling: supply coefficient or exponent, not both")]
    AmbiguousScaling,
    #[error("denom coefficient must be a positive finite number, got {0}")]
    InvalidCoefficient(f64),
    #[error("denom exponent {0} is too large, at most 308 is supported")]
    ExponentOutOfRange(u32),
    #[error("no denomination metadata available; provide symbol and coefficient manually")]
    NoDenomMetadata,
    #[error("requested denomination symbol not found in node metadata: {symbol}")]
    SymbolNotFound { symbol: String },
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Chain node connection settings.
    #[serde(default)]
    pub node: NodeConfig,

    /// Denomination overrides; empty means "ask the node".
    #[serde(default)]
    pub denom: DenomOverrides,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Bech32 address prefixes.
    #[serde(default)]
    pub bech32: Bech32Config,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node REST gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// REST (LCD) endpoint (default: "http://127.0.0.1:1317").
    #[serde(default = "default_api")]
    pub api: String,

    /// Deadline for every individual node query (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum validators fetched by the validators listing.
    #[serde(default = "default_validators_limit")]
    pub validators_limit: u64,
}

fn default_api() -> String {
    "http://127.0.0.1:1317".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_validators_limit() -> u64 {
    1000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            timeout_secs: default_timeout(),
            validators_limit: default_validators_limit(),
        }
    }
}

impl NodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9300").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Base path for metrics endpoints (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Constant labels added to all chain metrics.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: "cosmos").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Maximum distinct label sets of the scrape error counter.
    #[serde(default = "default_max_error_series")]
    pub max_error_series: usize,
}

fn default_listen() -> String {
    "0.0.0.0:9300".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "cosmos".to_string()
}

fn default_max_error_series() -> usize {
    10_000
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
            max_error_series: default_max_error_series(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Validation is left to the caller so CLI overrides can be applied first.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(load_config(path)?)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Denomination overrides are left to [`crate::denom::plan`], which
    /// applies them in resolution order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.node.validators_limit == 0 {
            return Err(ConfigError::Validation(
                "validators_limit must be > 0".to_string(),
            ));
        }

        if !(self.node.api.starts_with("http://") || self.node.api.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "Node API must be an http(s) URL: {}",
                self.node.api
            )));
        }

        if self.prometheus.max_error_series == 0 {
            return Err(ConfigError::Validation(
                "max_error_series must be > 0".to_string(),
            ));
        }

        // Validate listen address format
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

        // Sub-routes are appended to the path, so "/" alone is not allowed
        if !self.prometheus.path.starts_with('/')
            || self.prometheus.path.len() < 2
            || self.prometheus.path.ends_with('/')
        {
            return Err(ConfigError::Validation(
                "Metrics path must start with / and not end with /".to_string(),
            ));
        }

        Ok(())
    }
}
