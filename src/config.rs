//! Configuration management for the orchestrator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{defaults, OrchestratorError, Result};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection behavior
    pub connection: ConnectionConfig,

    /// Retry schedules for the two retried operations
    pub retries: RetriesConfig,

    /// File locations
    pub storage: StorageConfig,
}

/// Connection-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Per-request network timeout in seconds
    pub request_timeout_secs: u64,
}

/// Retry schedules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetriesConfig {
    /// Schedule for the add-host call against the cluster manager
    pub join: RetrySection,

    /// Schedule for DNS/NTP configuration pushes
    pub reconcile: RetrySection,
}

/// One retry schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in seconds
    pub base_delay_secs: u64,

    /// Multiplier applied after each further failure
    pub backoff_factor: u32,
}

/// File locations used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// TOML file holding named credential profiles
    pub credentials_file: PathBuf,

    /// JSON snapshot file for the inventory
    pub inventory_file: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(config_path: &str) -> Result<Self> {
        let content = fs::read_to_string(config_path).await.map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to read config file {config_path}: {e}"
            ))
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {}", config_path);
        Ok(config)
    }

    /// Load from an explicit path, the default path if present, or fall
    /// back to built-in defaults
    pub async fn load_or_default(config_path: Option<&str>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load(path).await,
            None if Path::new(defaults::CONFIG_FILE).exists() => {
                Self::load(defaults::CONFIG_FILE).await
            }
            None => Ok(Self::with_defaults()),
        }
    }

    /// Create default configuration
    pub fn with_defaults() -> Self {
        Self {
            connection: ConnectionConfig {
                request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            },
            retries: RetriesConfig {
                join: RetrySection {
                    max_attempts: defaults::JOIN_MAX_ATTEMPTS,
                    base_delay_secs: defaults::RETRY_BASE_DELAY_SECS,
                    backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
                },
                reconcile: RetrySection {
                    max_attempts: defaults::RECONCILE_MAX_ATTEMPTS,
                    base_delay_secs: defaults::RETRY_BASE_DELAY_SECS,
                    backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
                },
            },
            storage: StorageConfig {
                credentials_file: PathBuf::from(defaults::CREDENTIALS_FILE),
                inventory_file: PathBuf::from(defaults::INVENTORY_FILE),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.request_timeout_secs == 0 {
            return Err(OrchestratorError::Configuration(
                "Request timeout must be non-zero".to_string(),
            ));
        }

        for (name, section) in [
            ("join", &self.retries.join),
            ("reconcile", &self.retries.reconcile),
        ] {
            if section.max_attempts == 0 {
                return Err(OrchestratorError::Configuration(format!(
                    "Retry schedule {name} must allow at least one attempt"
                )));
            }
            if section.backoff_factor == 0 {
                return Err(OrchestratorError::Configuration(format!(
                    "Retry schedule {name} has an invalid backoff factor"
                )));
            }
        }

        Ok(())
    }

    /// Per-request network timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.request_timeout_secs)
    }

    /// Retry policy for the add-host call
    pub fn join_policy(&self) -> RetryPolicy {
        self.retries.join.policy()
    }

    /// Retry policy for configuration pushes
    pub fn reconcile_policy(&self) -> RetryPolicy {
        self.retries.reconcile.policy()
    }

    /// Generate example configuration file content
    pub fn example_toml() -> String {
        let config = Self::with_defaults();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

impl RetrySection {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            backoff_factor: self.backoff_factor,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}
