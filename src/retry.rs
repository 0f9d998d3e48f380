//! Retry policies for transient remote failures
//!
//! Only the delay schedule lives here; the loops themselves stay with the
//! operations that own them, so each can apply its own classification and
//! cancellation rules.

use std::time::Duration;

use crate::defaults;

/// Bounded exponential backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each further failure
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::JOIN_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(defaults::RETRY_BASE_DELAY_SECS),
            backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Delay to sleep after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay * self.backoff_factor.saturating_pow(exponent)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
