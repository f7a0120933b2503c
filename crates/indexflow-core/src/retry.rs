//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Stateless retry policy: computes the delay for a given attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before the `attempt`-th retry (1-based), without jitter.
    /// Returns `None` once `attempt` exceeds `max_retries`.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff_ms as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Backoff before the `attempt`-th retry, with random jitter applied.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let j = self.config.jitter_fraction;
        if j <= 0.0 {
            return Some(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - j)..=(1.0 + j));
        Some(base.mul_f64(factor))
    }

    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }
}
