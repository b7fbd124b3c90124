//! # Configuration
//!
//! Timeouts for the blocking points of a negotiation. Nothing here is retried
//! by the workflow; the values only bound how long a session waits before it is
//! rejected with a timeout.
//!
//! Configuration is loaded in the following order (later sources override earlier):
//! 1. Default values
//! 2. Configuration file (if exists)
//! 3. Environment variables (prefixed with `FX_AGREEMENT_`)
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `FX_AGREEMENT_CONFIG_FILE` | TOML file to read | `fx-agreement.toml` |
//! | `FX_AGREEMENT_RESPONSE_TIMEOUT_MS` | wait for the counterparty's reply | `30000` |
//! | `FX_AGREEMENT_FINALIZATION_TIMEOUT_MS` | wait for the finalizer | `60000` |
//! | `FX_AGREEMENT_OUTCOME_TIMEOUT_MS` | counterparty's wait for the finalization outcome | `120000` |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How long the initiator waits for a countersignature or refusal.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// How long the finalizer may take to confirm a commit.
    #[serde(default = "default_finalization_timeout")]
    pub finalization_timeout_ms: u64,

    /// How long a counterparty holds a countersigned trade waiting to hear
    /// `Finalized` or `Abort` before rejecting it.
    #[serde(default = "default_outcome_timeout")]
    pub outcome_timeout_ms: u64,
}

fn default_response_timeout() -> u64 {
    30_000
}

fn default_finalization_timeout() -> u64 {
    60_000
}

fn default_outcome_timeout() -> u64 {
    120_000
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout(),
            finalization_timeout_ms: default_finalization_timeout(),
            outcome_timeout_ms: default_outcome_timeout(),
        }
    }
}

impl WorkflowConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let config_path = std::env::var("FX_AGREEMENT_CONFIG_FILE")
            .unwrap_or_else(|_| "fx-agreement.toml".to_string());

        if Path::new(&config_path).exists() {
            config = Self::from_file(&config_path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("FX_AGREEMENT_RESPONSE_TIMEOUT_MS")
            && let Ok(ms) = ms.parse()
        {
            self.response_timeout_ms = ms;
        }
        if let Ok(ms) = std::env::var("FX_AGREEMENT_FINALIZATION_TIMEOUT_MS")
            && let Ok(ms) = ms.parse()
        {
            self.finalization_timeout_ms = ms;
        }
        if let Ok(ms) = std::env::var("FX_AGREEMENT_OUTCOME_TIMEOUT_MS")
            && let Ok(ms) = ms.parse()
        {
            self.outcome_timeout_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("response_timeout_ms", self.response_timeout_ms),
            ("finalization_timeout_ms", self.finalization_timeout_ms),
            ("outcome_timeout_ms", self.outcome_timeout_ms),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "timeout must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_finalization_timeout(mut self, timeout: Duration) -> Self {
        self.finalization_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_outcome_timeout(mut self, timeout: Duration) -> Self {
        self.outcome_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn finalization_timeout(&self) -> Duration {
        Duration::from_millis(self.finalization_timeout_ms)
    }

    pub fn outcome_timeout(&self) -> Duration {
        Duration::from_millis(self.outcome_timeout_ms)
    }
}
