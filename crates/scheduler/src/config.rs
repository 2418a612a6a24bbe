//! Scheduler configuration.

use std::str::FromStr;

use tasker_infra::ConfigError;
use tasker_infra::config::{env_lookup, parse_var};

const DEFAULT_TOPIC: &str = "work";
const DEFAULT_PAGE_SIZE: usize = 10;

/// What a one-shot future resolves to when the result store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFallback {
    /// Resolve with no value, as if the job produced nothing.
    #[default]
    Lenient,
    /// Reject with `JobFailure::ResultUnavailable`.
    Strict,
}

impl FromStr for ResultFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("expected `lenient` or `strict`, got `{other}`")),
        }
    }
}

/// What happens to a result record once the scheduler has read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapPolicy {
    /// Delete the record right after a successful read.
    #[default]
    DeleteAfterRead,
    /// Leave the record; expiry is up to the store (e.g. a Redis TTL).
    Retain,
}

impl FromStr for ReapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" | "delete_after_read" => Ok(Self::DeleteAfterRead),
            "retain" => Ok(Self::Retain),
            other => Err(format!("expected `delete_after_read` or `retain`, got `{other}`")),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Queue topic every job of this scheduler goes to
    pub topic: String,
    /// Page size used when enumerating pending jobs
    pub page_size: usize,
    pub result_fallback: ResultFallback,
    pub reap_policy: ReapPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            result_fallback: ResultFallback::default(),
            reap_policy: ReapPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Page size for pending-job scans. Clamped to at least 1.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_result_fallback(mut self, fallback: ResultFallback) -> Self {
        self.result_fallback = fallback;
        self
    }

    pub fn with_reap_policy(mut self, policy: ReapPolicy) -> Self {
        self.reap_policy = policy;
        self
    }

    /// Load from `TASKER_TOPIC`, `TASKER_PAGE_SIZE`, `TASKER_RESULT_FALLBACK`
    /// and `TASKER_REAP_POLICY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(topic) = parse_var::<String, _>(&lookup, "TASKER_TOPIC")? {
            config.topic = topic;
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "TASKER_PAGE_SIZE")? {
            if size == 0 {
                return Err(ConfigError::invalid("TASKER_PAGE_SIZE", "must be positive"));
            }
            config.page_size = size;
        }
        if let Some(fallback) = parse_var(&lookup, "TASKER_RESULT_FALLBACK")? {
            config.result_fallback = fallback;
        }
        if let Some(policy) = parse_var(&lookup, "TASKER_REAP_POLICY")? {
            config.reap_policy = policy;
        }
        Ok(config)
    }
}
