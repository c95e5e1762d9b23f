//! Retry policy and backoff calculation.
//!
//! A delivery gets a bounded number of total attempts; transient failures
//! schedule the next attempt after an exponentially growing delay. Delays are
//! slept through the injected clock inside the owning worker task, so one
//! delivery's backoff never stalls the loop or sibling deliveries.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy for webhook deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, the initial one included.
    pub max_attempts: u32,

    /// Delay after the first failed attempt; doubles on each later attempt.
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) randomizing each delay. Zero keeps the
    /// contractual 2s/4s progression exact.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

/// Outcome of a retry decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt again after the given backoff delay.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// Stop; the delivery is terminally failed.
    GiveUp {
        /// Why no further attempt will be made.
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether a failed attempt gets a successor.
    ///
    /// `attempt_number` is 1-based and counts the attempt that just failed.
    /// Non-retryable errors and exhausted attempt budgets both end the
    /// delivery.
    pub fn decide(&self, attempt_number: u32, error: &DeliveryError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.backoff_delay(attempt_number) }
    }

    /// Backoff delay following the given failed attempt.
    ///
    /// Doubles per attempt: base, 2*base, 4*base, ... capped at `max_delay`,
    /// with optional jitter. With the default 2s base this yields the 2s/4s
    /// progression.
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let raw = self.base_delay.saturating_mul(multiplier);
        let capped = raw.min(self.max_delay);

        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` to spread endpoint load.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_delivery_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(9), Duration::from_secs(10));
    }

    #[test]
    fn retryable_error_below_cap_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, &DeliveryError::server_error(500, ""));

        assert_eq!(decision, RetryDecision::Retry { delay: Duration::from_secs(2) });
    }

    #[test]
    fn attempt_cap_ends_the_delivery() {
        let policy = RetryPolicy::default();

        match policy.decide(3, &DeliveryError::server_error(500, "")) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => unreachable!("third attempt must be the last"),
        }
    }

    #[test]
    fn client_errors_never_retry() {
        let policy = RetryPolicy::default();

        match policy.decide(1, &DeliveryError::client_error(404, "not found")) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => unreachable!("4xx must not retry"),
        }
    }

    #[test]
    fn timeouts_retry_like_server_errors() {
        let policy = RetryPolicy::default();

        assert!(matches!(
            policy.decide(2, &DeliveryError::timeout(15)),
            RetryDecision::Retry { delay } if delay == Duration::from_secs(4)
        ));
    }

    #[test]
    fn jitter_varies_but_stays_bounded() {
        let policy = RetryPolicy { jitter_factor: 0.5, ..Default::default() };
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let delay = policy.backoff_delay(1);
            // 2s ± 50%
            assert!(delay >= Duration::from_secs(1), "delay too small: {delay:?}");
            assert!(delay <= Duration::from_secs(3), "delay too large: {delay:?}");
            seen.insert(delay.as_millis());
        }

        assert!(seen.len() > 1, "jitter should vary the delay");
    }
}
