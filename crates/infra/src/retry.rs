//! Retry policy for failed event deliveries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// base * (retries_so_far + 1)
    #[default]
    Linear,
    /// base * 2^retries_so_far
    Exponential,
}

/// How many times a failed event is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = never retry).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether another retry may be scheduled when `retries_so_far` have already been.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before the next retry, given the retries already scheduled.
    ///
    /// With the default policy: 5s, 10s, 15s.
    pub fn delay_for(&self, retries_so_far: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retries_so_far.saturating_add(1)),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(retries_so_far).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Upper bound on processing attempts for one event (initial + retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What `schedule_retry` decided for a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RetryOutcome {
    /// Another attempt is scheduled after `delay`.
    Scheduled { retry: u32, delay: Duration },
    /// `max_retries` reached; the event is permanently failed.
    Exhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_policy_backs_off_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(15));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    proptest! {
        #[test]
        fn linear_delays_never_decrease(base_ms in 1u64..10_000, n in 0u32..50) {
            let policy = RetryPolicy::linear(50, Duration::from_millis(base_ms));
            prop_assert!(policy.delay_for(n + 1) > policy.delay_for(n));
        }
    }
}
