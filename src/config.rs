use crate::connection::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PypilotConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PypilotConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Bridge options, loaded from a JSON file. Every field has a default, so
/// `{}` is valid:
///
/// ```json
/// { "pypilot": { "host": "localhost", "port": 8000 }, "reconnect_interval_ms": 3000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub pypilot: PypilotConfig,
    /// Pause between connection attempts made by the TCP transport.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pypilot: PypilotConfig::default(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

fn default_reconnect_interval_ms() -> u64 {
    3000
}

impl BridgeConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pypilot.host.trim().is_empty() {
            return Err(ConfigError::Validation("pypilot.host must not be empty".to_string()));
        }
        if self.pypilot.port == 0 {
            return Err(ConfigError::Validation("pypilot.port must be non-zero".to_string()));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "reconnect_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.pypilot.host.clone(), self.pypilot.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("validation error: {0}")]
    Validation(String),
}
