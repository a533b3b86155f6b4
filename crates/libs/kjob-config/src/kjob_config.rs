//! Runner configuration for kjob.

use crate::prelude::*;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Global configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Configuration version.
    pub version: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            version: String::from("1.0.0"),
        }
    }
}

/// How to reach the cluster.
///
/// When both fields are empty the client configuration is inferred from the
/// environment (in-cluster service account or the default kubeconfig).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Path to a kubeconfig file.
    pub kubeconfig: Option<PathBuf>,
    /// Context to select inside the kubeconfig.
    pub context: Option<String>,
}

/// Unlimited exponential backoff settings used by every watch retry loop.
///
/// There is no attempt or elapsed-time limit: the caller bounds the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First wait, in milliseconds.
    pub initial_interval_ms: u64,
    /// Growth factor applied after every wait.
    pub multiplier: f64,
    /// Upper bound of a single wait, in milliseconds.
    pub max_interval_ms: u64,
    /// Jitter applied to every wait, in `[0, 1)`.
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_interval_ms: 60_000,
            randomization_factor: 0.5,
        }
    }
}

/// Log copying settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Size of the read buffer used by every container log copy.
    pub buffer_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { buffer_size: 8192 }
    }
}

/// Runner configuration, usually loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KjobConfig {
    /// Global settings.
    pub global: GlobalConfig,
    /// Cluster access.
    pub cluster: ClusterConfig,
    /// Retry policy for watches.
    pub retry: RetryConfig,
    /// Log copying.
    pub logs: LogConfig,
}

impl KjobConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", file_path.display());
        let contents = std::fs::read_to_string(file_path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        let config: Self = toml::from_str(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.initial_interval_ms == 0 {
            return Err(Error::invalid("retry.initial_interval_ms", "must be > 0"));
        }
        if retry.multiplier < 1.0 {
            return Err(Error::invalid("retry.multiplier", "must be >= 1.0"));
        }
        if retry.max_interval_ms < retry.initial_interval_ms {
            return Err(Error::invalid(
                "retry.max_interval_ms",
                "must be >= retry.initial_interval_ms",
            ));
        }
        if !(0.0..1.0).contains(&retry.randomization_factor) {
            return Err(Error::invalid(
                "retry.randomization_factor",
                "must be in [0, 1)",
            ));
        }
        if self.logs.buffer_size == 0 {
            return Err(Error::invalid("logs.buffer_size", "must be > 0"));
        }
        Ok(())
    }
}
