//! Configuration management for pacer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PacerError, Result};

/// Environment prefix for overrides, e.g. `PACER__LIMITER__INTERVAL_MS=250`.
const ENV_PREFIX: &str = "PACER";

/// Main configuration for a pacer deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Name used to tag the limiter's log output
    #[serde(default = "default_name")]
    pub name: String,

    /// Minimum spacing between released units, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl LimiterConfig {
    /// The configured interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_name() -> String {
    "notify".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PacerConfig {
    /// Load configuration from a file, layered under `PACER__*` environment
    /// variables. The file format follows its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading pacer configuration");

        if !path.exists() {
            return Err(PacerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file {} not found", path.display()),
            )));
        }

        let config: PacerConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PacerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PacerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PacerError::Config(format!("Failed to parse pacer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the deserializer cannot.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.interval_ms == 0 {
            return Err(PacerError::Config(
                "limiter.interval_ms must be greater than zero".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(PacerError::Config(format!("unknown log level: {}", other))),
        }
    }
}
