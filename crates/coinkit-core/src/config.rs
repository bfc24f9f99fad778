//! Configuration management for CoinKit

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerting::RateThresholds;
use crate::error::Result;

/// Prefix for environment overrides, e.g. `COINKIT__ENGINE__CAP_THRESHOLD`
pub const ENV_PREFIX: &str = "COINKIT";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Evaluation engine configuration
    pub engine: EngineConfig,

    /// Source adapter configuration
    pub sources: SourcesConfig,

    /// Notification configuration
    pub notifier: NotifierConfig,

    /// Self-monitoring configuration
    pub telemetry: TelemetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file, then the environment.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("coinkit").required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL, `sqlite::memory:` for a throwaway store
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://coinkit.db".to_string(),
        }
    }
}

/// Evaluation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time between cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Budget for a single adapter fetch
    #[serde(with = "humantime_serde")]
    pub adapter_timeout: Duration,
    /// Ratio at or above which a cap counts as reached
    pub cap_threshold: f64,
    /// Rate move thresholds
    pub rates: RateThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            adapter_timeout: Duration::from_secs(45),
            cap_threshold: 1.0,
            rates: RateThresholds::default(),
        }
    }
}

/// Source adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Adapters to run, by name
    pub enabled: Vec<String>,
    /// Timeout for each upstream HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: crate::sources::ADAPTER_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Adapter tag -> destination (webhook URL)
    pub routes: HashMap<String, String>,
    /// Where engine failures are reported
    pub operator_destination: Option<String>,
    /// Webhook request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            operator_destination: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Self-monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Expose Prometheus metrics on this port when set
    pub prometheus_port: Option<u16>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
