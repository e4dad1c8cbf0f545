//! Exponential backoff with bounded jitter for failed jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use taskhub_core::config::RetryConfig;

/// Computes when a failed job becomes claimable again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    /// Create a policy from explicit bounds.
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Create a policy from the worker configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_secs(config.max_delay_seconds),
            config.jitter_ratio,
        )
    }

    /// Delay before jitter for the retry following the `attempt`-th failure.
    pub fn base_delay(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Delay including a uniformly drawn jitter in `[0, base_delay * jitter_ratio]`.
    pub fn delay(&self, attempt: i32) -> Duration {
        let delay = self.base_delay(attempt);
        let max_jitter_ms = (delay.as_millis() as f64 * self.jitter_ratio) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }

    /// Next claim time for a job that has now failed `attempt` times.
    pub fn next_run_at(&self, now: DateTime<Utc>, attempt: i32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max.as_secs() as i64));
        now + delay
    }
}
