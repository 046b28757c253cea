//! Exponential backoff with jitter
//!
//! Shared by the fetcher (per URL) and the batch writer (per batch).

use crate::config::{BatchConfig, RetryConfig};
use std::time::Duration;

/// Bounded exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Relative jitter (0.0 - 1.0) applied around each delay
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// Batch retries reuse the fetch backoff curve with their own attempt cap
    pub fn for_batches(batch: &BatchConfig, retry: &RetryConfig) -> Self {
        Self::new(
            batch.max_attempts,
            Duration::from_millis(retry.base_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
            retry.jitter,
        )
    }

    /// Policy with no delays, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Returns true if another attempt may follow attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay before retry number `retry` (1-based)
    ///
    /// `base × 2^(retry-1)`, capped at `max_delay`. Never decreases as
    /// `retry` grows.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay before retry number `retry` (1-based)
    ///
    /// Stays within `ceiling ± jitter × ceiling` and never exceeds `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry).as_secs_f64();
        let spread = ceiling * self.jitter;
        let delay = if spread > 0.0 {
            ceiling + rand::random_range(-spread..=spread)
        } else {
            ceiling
        };

        Duration::from_secs_f64(delay.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}
