//! MAL Instance Configuration
//!
//! Loads settings from an optional TOML file with `MAL__` environment
//! variable overrides, e.g. `MAL__CONSUMER__WAIT_TIMEOUT_MS=5000`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/mal.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "MAL";

/// Default time a synchronous consumer waits for a reply
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// 2010-01-01T00:00:00Z, the reference point of transaction id magnitudes
pub const DEFAULT_TRANSACTION_EPOCH: u64 = 1_262_304_000;

/// Main configuration of a MAL instance
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MalConfig {
    pub consumer: ConsumerSettings,
    pub transaction: TransactionSettings,
    pub pubsub: PubSubSettings,
    pub logging: LoggingConfig,
}

/// Consumer side settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// How long a synchronous interaction waits for each reply stage
    pub wait_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl ConsumerSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Transaction id allocation settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Unix time, in seconds, subtracted from the clock before shifting
    pub epoch_unix_seconds: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            epoch_unix_seconds: DEFAULT_TRANSACTION_EPOCH,
        }
    }
}

/// Publish-subscribe routing settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PubSubSettings {
    /// Separator placed between session, zone and domain parts of a provider key
    pub provider_key_separator: String,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            provider_key_separator: "::".to_string(),
        }
    }
}

/// Logging settings consumed by the tracing subscriber
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `mal_interaction=debug`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MalConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist. Without one,
    /// [`DEFAULT_CONFIG_PATH`] is used if present. Environment variables
    /// override both.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        debug!("Loading MAL configuration from {:?} (required: {})", file, required);

        let builder = Config::builder()
            .add_source(File::from(file).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        let config: MalConfig = builder
            .build()
            .context("Failed to build MAL configuration")?
            .try_deserialize()
            .context("Failed to deserialize MAL configuration")?;

        config.validate()?;
        info!(
            wait_timeout_ms = config.consumer.wait_timeout_ms,
            log_level = %config.logging.level,
            "MAL configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: MalConfig =
            toml::from_str(toml_str).context("Failed to parse MAL configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.consumer.wait_timeout_ms == 0 {
            bail!("consumer.wait_timeout_ms must be greater than zero");
        }
        if self.pubsub.provider_key_separator.is_empty() {
            bail!("pubsub.provider_key_separator must not be empty");
        }
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        Ok(())
    }
}
