use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::DEFAULT_MAX_RETRIES;

/// Configuration for the scrape worker loop and its retry policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of messages requested per receive.
    pub batch_size: usize,
    /// Maximum number of messages processed at once. Never above `batch_size`.
    pub concurrency: usize,
    /// Long-poll wait for a receive, in seconds.
    pub poll_wait_secs: u64,
    /// Sleep after an empty receive, in milliseconds.
    pub idle_backoff_ms: u64,
    /// Sleep after a failed receive, in milliseconds.
    pub error_backoff_ms: u64,
    /// Upper bound on a single extraction, in milliseconds.
    pub extract_timeout_ms: u64,
    /// Delay before the first retry, in milliseconds.
    pub base_backoff_ms: u64,
    /// Cap on any retry delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Retry budget for submissions that do not set one.
    pub default_max_retries: u32,
    /// Time allowed for in-flight messages to finish on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            poll_wait_secs: 20,
            idle_backoff_ms: 1_000,
            error_backoff_ms: 5_000,
            extract_timeout_ms: 30_000,
            base_backoff_ms: 5_000,
            max_backoff_ms: 300_000, // 5 minutes
            default_max_retries: DEFAULT_MAX_RETRIES,
            shutdown_grace_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Defaults overlaid with any valid values found in the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        Self {
            batch_size: parse_or(var("QUEUE_BATCH_SIZE"), defaults.batch_size),
            concurrency: parse_or(var("WORKER_CONCURRENCY"), defaults.concurrency),
            poll_wait_secs: parse_or(
                var("QUEUE_WAIT_TIME_SECONDS"),
                defaults.poll_wait_secs,
            ),
            idle_backoff_ms: parse_or(
                var("WORKER_IDLE_BACKOFF_MS"),
                defaults.idle_backoff_ms,
            ),
            error_backoff_ms: parse_or(
                var("WORKER_ERROR_BACKOFF_MS"),
                defaults.error_backoff_ms,
            ),
            extract_timeout_ms: parse_or(
                var("PAGE_TIMEOUT"),
                defaults.extract_timeout_ms,
            ),
            base_backoff_ms: parse_or(
                var("RETRY_BASE_DELAY_MS"),
                defaults.base_backoff_ms,
            ),
            max_backoff_ms: parse_or(
                var("RETRY_MAX_DELAY_MS"),
                defaults.max_backoff_ms,
            ),
            default_max_retries: parse_or(
                var("JOB_MAX_RETRIES"),
                defaults.default_max_retries,
            ),
            shutdown_grace_secs: parse_or(
                var("WORKER_SHUTDOWN_GRACE_SECONDS"),
                defaults.shutdown_grace_secs,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if self.concurrency > self.batch_size {
            return Err(invalid(
                "concurrency",
                format!(
                    "{} exceeds batch_size {}",
                    self.concurrency, self.batch_size
                ),
            ));
        }
        if self.extract_timeout_ms == 0 {
            return Err(invalid("extract_timeout_ms", "must be positive"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(invalid(
                "base_backoff_ms",
                format!(
                    "{} exceeds max_backoff_ms {}",
                    self.base_backoff_ms, self.max_backoff_ms
                ),
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_wait(mut self, secs: u64) -> Self {
        self.poll_wait_secs = secs;
        self
    }

    pub fn with_idle_backoff(mut self, ms: u64) -> Self {
        self.idle_backoff_ms = ms;
        self
    }

    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    pub fn with_extract_timeout(mut self, ms: u64) -> Self {
        self.extract_timeout_ms = ms;
        self
    }

    /// Set both retry delay bounds.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_backoff_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_shutdown_grace(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Settings for the HTTP extraction tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Static text at or below this many characters falls back to rendering.
    pub min_text_len: usize,
    /// Request timeout for the static tier, in milliseconds.
    pub static_timeout_ms: u64,
    /// User-Agent header sent by the static tier.
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_text_len: 100,
            static_timeout_ms: 10_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn static_timeout(&self) -> Duration {
        Duration::from_millis(self.static_timeout_ms)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|raw| raw.trim().parse().ok()).unwrap_or(default)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
