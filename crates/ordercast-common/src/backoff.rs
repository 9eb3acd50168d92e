//! Exponential backoff with bounded jitter for failed processing attempts.
//!
//! Both processors schedule retries with the same shape: the delay doubles
//! with every failed attempt, a uniform random jitter is added so rows that
//! failed together do not retry together, and a hard ceiling bounds the
//! whole thing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff configuration shared by the outbox and snapshot processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in seconds before the first retry.
    pub base_delay_secs: u64,
    /// Ceiling for the computed delay, in seconds.
    pub max_delay_secs: u64,
    /// Upper bound (inclusive) of the uniform jitter, in seconds.
    pub max_jitter_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_secs: 5, max_delay_secs: 300, max_jitter_secs: 5 }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many retries already failed.
    ///
    /// Computes `min(base * 2^retry_count + jitter, max_delay)` where jitter
    /// is drawn uniformly from `0..=max_jitter_secs`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exponential =
            self.base_delay_secs.saturating_mul(2u64.saturating_pow(retry_count.min(32)));
        let jitter = if self.max_jitter_secs == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_secs)
        };
        let delay_secs = exponential.saturating_add(jitter).min(self.max_delay_secs);
        Duration::from_secs(delay_secs)
    }

    /// Timestamp of the next attempt relative to `now`.
    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.delay(retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 2))
    }

    /// Inclusive bounds of the possible delay for a given retry count.
    ///
    /// Used by tests to assert the scheduling invariant without fixing the
    /// jitter seed.
    pub fn delay_bounds(&self, retry_count: u32) -> (Duration, Duration) {
        let exponential =
            self.base_delay_secs.saturating_mul(2u64.saturating_pow(retry_count.min(32)));
        let lo = exponential.min(self.max_delay_secs);
        let hi = exponential.saturating_add(self.max_jitter_secs).min(self.max_delay_secs);
        (Duration::from_secs(lo), Duration::from_secs(hi))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn delay_doubles_per_retry_without_jitter() {
        let policy =
            BackoffPolicy { base_delay_secs: 5, max_delay_secs: 3600, max_jitter_secs: 0 };

        let delays: Vec<_> = (0..4).map(|n| policy.delay(n).as_secs()).collect();

        assert_eq!(delays, vec![5, 10, 20, 40]);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = BackoffPolicy { base_delay_secs: 5, max_delay_secs: 60, max_jitter_secs: 5 };

        // 5 * 2^10 is far past the ceiling.
        assert_eq!(policy.delay(10), Duration::from_secs(60));
    }

    #[test]
    fn next_retry_at_is_relative_to_now() {
        let policy = BackoffPolicy { base_delay_secs: 5, max_delay_secs: 300, max_jitter_secs: 0 };
        let now = Utc::now();

        let at = policy.next_retry_at(now, 1);

        assert_eq!(at - now, chrono::Duration::seconds(10));
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(retry_count in 0u32..12, jitter in 0u64..30) {
            let policy = BackoffPolicy {
                base_delay_secs: 5,
                max_delay_secs: 300,
                max_jitter_secs: jitter,
            };

            let (lo, hi) = policy.delay_bounds(retry_count);
            let delay = policy.delay(retry_count);

            prop_assert!(delay >= lo, "delay {delay:?} below lower bound {lo:?}");
            prop_assert!(delay <= hi, "delay {delay:?} above upper bound {hi:?}");
            prop_assert!(delay.as_secs() <= 300);
        }
    }
}
