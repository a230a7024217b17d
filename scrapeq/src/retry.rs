use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WorkerConfig;

/// Backoff parameters for re-enqueueing failed jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_backoff_ms: 300_000, // 5 minutes
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_backoff: Duration) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            base_delay_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Delay before the attempt that follows `retry_count` earlier retries.
    ///
    /// Formula: delay = min(base_delay * 2^retry_count, max_backoff)
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(i32::MAX as u32) as i32;
        let scaled = (self.base_delay_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Choose between another attempt and dead-lettering.
    ///
    /// `retry_count` is the count carried by the message that just failed.
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if should_dead_letter(retry_count, max_retries) {
            RetryDecision::DeadLetter {
                attempts: retry_count.saturating_add(1),
            }
        } else {
            RetryDecision::Retry {
                retry_count: retry_count + 1,
                delay: self.backoff(retry_count),
            }
        }
    }
}

/// True once another retry would exceed `max_retries`.
pub fn should_dead_letter(retry_count: u32, max_retries: u32) -> bool {
    retry_count.saturating_add(1) > max_retries
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue carrying `retry_count`, visible after `delay`.
    Retry { retry_count: u32, delay: Duration },
    /// Budget exhausted after `attempts` extractions.
    DeadLetter { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_exponential() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(0), Duration::from_millis(5_000));
        assert_eq!(policy.backoff(1), Duration::from_millis(10_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(20_000));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_backoff_ms: 5_000,
        };

        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_backoff_strictly_increases_until_cap() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
        );

        let delays: Vec<_> = (0..12).map(|n| policy.backoff(n)).collect();
        for pair in delays.windows(2) {
            if pair[0] < policy.backoff(u32::MAX) {
                assert!(pair[1] > pair[0], "{:?} !> {:?}", pair[1], pair[0]);
            } else {
                assert_eq!(pair[1], pair[0]);
            }
        }
        assert_eq!(delays[11], Duration::from_secs(10));
    }

    #[test]
    fn test_should_dead_letter() {
        assert!(!should_dead_letter(0, 3));
        assert!(!should_dead_letter(1, 3));
        assert!(!should_dead_letter(2, 3));
        assert!(should_dead_letter(3, 3));
        assert!(should_dead_letter(0, 0));
        assert!(should_dead_letter(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_decide_retry_carries_incremented_count() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(0, 3),
            RetryDecision::Retry {
                retry_count: 1,
                delay: Duration::from_millis(5_000),
            }
        );
        assert_eq!(
            policy.decide(2, 3),
            RetryDecision::Retry {
                retry_count: 3,
                delay: Duration::from_millis(20_000),
            }
        );
    }

    #[test]
    fn test_decide_dead_letters_when_exhausted() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(3, 3),
            RetryDecision::DeadLetter { attempts: 4 }
        );
        assert_eq!(
            policy.decide(0, 0),
            RetryDecision::DeadLetter { attempts: 1 }
        );
    }
}
