//! Configuration for the orchestrator.
//!
//! Every section falls back to its defaults, so an empty document `()` is a
//! valid configuration.
//!
//! ```ron
//! (
//!     retry: (max_attempts: 3, base_delay_ms: 1000, backoff_factor: 2.0),
//!     admission: (capacity: 5, window_ms: 10000),
//!     circuit_breaker: (failure_threshold: 3, reset_timeout_ms: 30000),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    audit::AuditConfig, circuit_breaker::CircuitBreakerConfig, error::ConfigError,
    policy::RetryPolicy, queue::QueueConfig, rate_limiter::AdmissionConfig,
};

/// Environment variable pointing at a configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Top-level configuration, immutable once the orchestrator is built
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    /// Per-provider retry and backoff
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Shared token bucket
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Per-provider circuit breakers
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Deferred queue drain loop
    #[serde(default)]
    pub queue: QueueConfig,

    /// Audit event emission
    #[serde(default)]
    pub audit: AuditConfig,
}

impl HeraldConfig {
    /// Parse a configuration from RON
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails validation.
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&content)
    }

    /// Find the configuration file using the following precedence:
    /// 1. `HERALD_CONFIG` environment variable
    /// 2. ./herald.config.ron (current working directory)
    /// 3. /etc/herald/herald.config.ron (system-wide config)
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable names a missing file or
    /// none of the default locations exist.
    pub fn find_config_file() -> Result<PathBuf, ConfigError> {
        Self::find_config_file_from(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    fn find_config_file_from(env_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = env_path {
            if path.exists() {
                return Ok(path);
            }
            return Err(ConfigError::NotFound(format!(
                "  - {CONFIG_ENV}={} (does not exist)",
                path.display()
            )));
        }

        let default_paths = [
            PathBuf::from("./herald.config.ron"),
            PathBuf::from("/etc/herald/herald.config.ron"),
        ];

        if let Some(path) = default_paths.iter().find(|path| path.exists()) {
            return Ok(path.clone());
        }

        let paths_tried = default_paths
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");

        Err(ConfigError::NotFound(format!(
            "  - {CONFIG_ENV} environment variable\n{paths_tried}"
        )))
    }

    /// Check every section for out-of-range values
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.admission.validate()?;
        self.circuit_breaker.validate()
    }
}
