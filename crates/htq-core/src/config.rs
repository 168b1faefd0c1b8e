//! Configuration loading from environment variables.

use std::time::Duration;

use crate::app::DEFAULT_CANCEL_ATTEMPTS;
use crate::domain::DEFAULT_TIMEOUT_MS;
use crate::keys::DEFAULT_PREFIX;

pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";

/// Where requests, responses and the queue live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// A Redis server, addressed by its connection url.
    Redis(String),
    /// Process-local store; only useful for a single process.
    Memory,
}

impl StoreBackend {
    fn parse(url: &str) -> Result<Self, ConfigError> {
        if url == "memory://" {
            Ok(StoreBackend::Memory)
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Ok(StoreBackend::Redis(url.to_string()))
        } else {
            Err(ConfigError::Invalid(
                "HTQ_STORE_URL",
                "must start with redis://, rediss:// or be memory://",
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store: StoreBackend,
    /// Prefix of every store key.
    pub key_prefix: String,
    /// Outbound timeout for requests sent without one.
    pub default_timeout_ms: u64,
    /// Worker tasks started by `htq worker`.
    pub workers: usize,
    /// How long an idle worker waits on the queue before checking for shutdown.
    pub poll_interval: Duration,
    pub cancel_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreBackend::Redis(DEFAULT_STORE_URL.to_string()),
            key_prefix: DEFAULT_PREFIX.to_string(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            workers: 4,
            poll_interval: Duration::from_millis(1000),
            cancel_max_attempts: DEFAULT_CANCEL_ATTEMPTS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `HTQ_STORE_URL`: `redis://...` or `memory://` (default: `redis://127.0.0.1:6379`)
    /// - `HTQ_KEY_PREFIX`: store key prefix (default: `htq`)
    /// - `HTQ_DEFAULT_TIMEOUT_MS`: outbound timeout in ms (default: 60000)
    /// - `HTQ_WORKERS`: worker tasks (default: 4)
    /// - `HTQ_POLL_INTERVAL_MS`: idle pop wait in ms (default: 1000)
    /// - `HTQ_CANCEL_MAX_ATTEMPTS`: cancel retries before giving up (default: 8)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let store = match std::env::var("HTQ_STORE_URL") {
            Ok(url) => StoreBackend::parse(url.trim())?,
            Err(_) => defaults.store,
        };

        let key_prefix = std::env::var("HTQ_KEY_PREFIX").unwrap_or(defaults.key_prefix);
        if key_prefix.is_empty() {
            return Err(ConfigError::Invalid("HTQ_KEY_PREFIX", "must not be empty"));
        }

        let default_timeout_ms = positive("HTQ_DEFAULT_TIMEOUT_MS", defaults.default_timeout_ms)?;
        let workers = positive("HTQ_WORKERS", defaults.workers as u64)? as usize;
        let poll_interval_ms =
            positive("HTQ_POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64)?;
        let cancel_max_attempts =
            positive("HTQ_CANCEL_MAX_ATTEMPTS", u64::from(defaults.cancel_max_attempts))?;
        let cancel_max_attempts = u32::try_from(cancel_max_attempts).map_err(|_| {
            ConfigError::Invalid("HTQ_CANCEL_MAX_ATTEMPTS", "must fit in 32 bits")
        })?;

        Ok(Self {
            store,
            key_prefix,
            default_timeout_ms,
            workers,
            poll_interval: Duration::from_millis(poll_interval_ms),
            cancel_max_attempts,
        })
    }
}

fn positive(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid(var, "must be a positive integer")),
        Ok(value) => Ok(value),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
