//! Configuration loading and representation.
//!
//! Every config struct has a `Default`, `with_*` builders, and a loader that
//! reads from a key lookup. `from_env()` plugs in the process environment;
//! tests pass a map instead.

use std::str::FromStr;
use std::time::Duration;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Read and parse an optional variable.
///
/// Unset or blank variables yield `Ok(None)`.
pub fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        _ => Ok(None),
    }
}

/// Process environment as a lookup function.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_KEY_PREFIX: &str = "tasker";

/// Redis backend settings (shared by the work queue and the result store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace for every key and channel the backends touch.
    pub key_prefix: String,
    /// Expiry applied to result records when workers write them.
    pub result_ttl: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            result_ttl: None,
        }
    }
}

impl RedisConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Load from `REDIS_URL`, `TASKER_KEY_PREFIX` and `TASKER_RESULT_TTL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = parse_var::<String, _>(&lookup, "REDIS_URL")? {
            config.url = url;
        }
        if let Some(prefix) = parse_var::<String, _>(&lookup, "TASKER_KEY_PREFIX")? {
            config.key_prefix = prefix;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TASKER_RESULT_TTL_SECS")? {
            if secs == 0 {
                return Err(ConfigError::invalid("TASKER_RESULT_TTL_SECS", "must be positive"));
            }
            config.result_ttl = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
