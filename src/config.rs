//! Session configuration.
//!
//! Defaults suit a BLE presentment at a counter. Everything can be overridden from a
//! JSON file or from `PROXIMITY_*` environment variables.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::definitions::device_key::cose_key::EC2Curve;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long the holder waits for the reader's first message.
    pub engagement_timeout_ms: u64,

    /// How long a single connection attempt may take.
    pub connect_timeout_ms: u64,

    /// How long to wait for each complete inbound message.
    pub receive_timeout_ms: u64,

    /// Largest reassembled message accepted, in bytes.
    pub max_message_size: usize,

    /// Curve for the ephemeral session keys.
    pub ephemeral_curve: EC2Curve,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engagement_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            receive_timeout_ms: 30_000,
            max_message_size: 1024 * 1024, // 1 MiB
            ephemeral_curve: EC2Curve::P256,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Apply `PROXIMITY_*_TIMEOUT_MS` and `PROXIMITY_MAX_MESSAGE_SIZE` overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        fn var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
            match std::env::var(name) {
                Ok(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Parse(format!("{name}={v}"))),
                Err(_) => Ok(None),
            }
        }
        if let Some(v) = var("PROXIMITY_ENGAGEMENT_TIMEOUT_MS")? {
            self.engagement_timeout_ms = v;
        }
        if let Some(v) = var("PROXIMITY_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = var("PROXIMITY_RECEIVE_TIMEOUT_MS")? {
            self.receive_timeout_ms = v;
        }
        if let Some(v) = var("PROXIMITY_MAX_MESSAGE_SIZE")? {
            self.max_message_size = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engagement_timeout_ms == 0
            || self.connect_timeout_ms == 0
            || self.receive_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be non-zero".into()));
        }
        if !matches!(self.ephemeral_curve, EC2Curve::P256 | EC2Curve::P384) {
            return Err(ConfigError::Invalid(format!(
                "{:?} cannot be used for session keys",
                self.ephemeral_curve
            )));
        }
        Ok(())
    }

    pub fn engagement_timeout(&self) -> Duration {
        Duration::from_millis(self.engagement_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_message_size, 1 << 20);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            SessionConfig::from_json(r#"{"receive_timeout_ms": 500, "ephemeral_curve": "P384"}"#)
                .unwrap();
        assert_eq!(config.receive_timeout_ms, 500);
        assert_eq!(config.ephemeral_curve, EC2Curve::P384);
        assert_eq!(config.engagement_timeout_ms, 30_000);
    }

    #[test]
    fn invalid_configs() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"connect_timeout_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{"ephemeral_curve": "P521"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{"unknown": 1}"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
