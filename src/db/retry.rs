//! Backoff policy for busy/locked retries

use crate::config::DatabaseConfig;
use std::time::Duration;

/// Bounded exponential backoff: `min(initial * 2^(attempt-1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
