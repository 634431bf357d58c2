//! # MAL Middleware Configuration
//!
//! Settings for a MAL instance: synchronous wait timeout, transaction id
//! epoch, pub-sub routing key format and logging.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mal_config::MalConfig;
//!
//! // Defaults, overlaid by config/mal.toml if present and MAL__* variables
//! let config = MalConfig::load(None).unwrap();
//! let timeout = config.consumer.wait_timeout();
//! ```
//!
//! ## File Format
//!
//! ```toml
//! [consumer]
//! wait_timeout_ms = 30000
//!
//! [transaction]
//! epoch_unix_seconds = 1262304000
//!
//! [pubsub]
//! provider_key_separator = "::"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

pub mod settings;

pub use settings::{
    ConsumerSettings, LoggingConfig, MalConfig, PubSubSettings, TransactionSettings,
    DEFAULT_CONFIG_PATH, DEFAULT_TRANSACTION_EPOCH, DEFAULT_WAIT_TIMEOUT_MS, ENV_PREFIX,
};
