//! Engine configuration: defaults, optional YAML file, environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub provider_base_url: String,
    pub poll_interval_ms: u64,
    /// Pause after each row so the provider's ingestion pipeline can settle.
    pub row_grace_period_ms: u64,
    pub confirmation: ConfirmationConfig,
    pub sandbox: SandboxConfig,
    pub credentials: CredentialConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmationConfig {
    pub initial_wait_ms: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub concurrency: usize,
    pub operation_timeout_ms: u64,
    pub workspace_root: String,
    pub interpreter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialConfig {
    pub key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("crucible.db"),
            provider_base_url: "http://127.0.0.1:8787".to_string(),
            poll_interval_ms: 1_000,
            row_grace_period_ms: 10_000,
            confirmation: ConfirmationConfig::default(),
            sandbox: SandboxConfig::default(),
            credentials: CredentialConfig::default(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            initial_wait_ms: 1_000,
            max_wait_ms: 10 * 60 * 1_000,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            operation_timeout_ms: 10_000,
            workspace_root: "/tmp/evaluator".to_string(),
            interpreter: "python3".to_string(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            key_prefix: "sk-crucible".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then the YAML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        let cfg = cfg.with_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("CRUCIBLE_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("CRUCIBLE_PROVIDER_BASE_URL") {
            self.provider_base_url = v;
        }
        if let Some(v) = parse_env("CRUCIBLE_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = parse_env("CRUCIBLE_ROW_GRACE_PERIOD_MS")? {
            self.row_grace_period_ms = v;
        }
        if let Some(v) = parse_env("CRUCIBLE_SANDBOX_CONCURRENCY")? {
            self.sandbox.concurrency = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.concurrency must be at least 1".into(),
            ));
        }
        if self.confirmation.initial_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "confirmation.initial_wait_ms must be at least 1".into(),
            ));
        }
        if self.confirmation.max_wait_ms < self.confirmation.initial_wait_ms {
            return Err(ConfigError::Invalid(
                "confirmation.max_wait_ms must not be below initial_wait_ms".into(),
            ));
        }
        if self.credentials.key_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "credentials.key_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn row_grace_period(&self) -> Duration {
        Duration::from_millis(self.row_grace_period_ms)
    }
}

impl SandboxConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
