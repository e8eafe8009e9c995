//! Connection configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with `ARVAK_PVM_` prefix)
//! 3. .env files
//!
//! Precedence (highest to lowest): environment, file, defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default QVM-NG endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5222";

/// Settings for reaching a QVM-NG service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvmConfig {
    /// Service URL every RPC is POSTed to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Delay between `job-info` polls while waiting for a job result.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for PvmConfig {
    fn default() -> Self {
        PvmConfig {
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl PvmConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: PvmConfig = serde_yaml_ng::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Load configuration with the following precedence:
    /// 1. Load .env file if it exists
    /// 2. Load from file if provided, else defaults
    /// 3. Apply environment variable overrides
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => PvmConfig::default(),
        };

        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply the variables that are set in the environment.
    ///
    /// - `ARVAK_PVM_ENDPOINT`
    /// - `ARVAK_PVM_TIMEOUT`
    /// - `ARVAK_PVM_CONNECT_TIMEOUT`
    /// - `ARVAK_PVM_POLL_MS`
    ///
    /// Unparseable numbers are ignored.
    pub fn merge_env(mut self) -> Self {
        if let Ok(v) = std::env::var("ARVAK_PVM_ENDPOINT") {
            self.endpoint = v;
        }
        if let Ok(v) = std::env::var("ARVAK_PVM_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.timeout_seconds = val;
            }
        }
        if let Ok(v) = std::env::var("ARVAK_PVM_CONNECT_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.connect_timeout_seconds = val;
            }
        }
        if let Ok(v) = std::env::var("ARVAK_PVM_POLL_MS") {
            if let Ok(val) = v.parse() {
                self.poll_interval_ms = val;
            }
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }
        if self.timeout_seconds == 0 || self.connect_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
