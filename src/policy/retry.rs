//! Retry policy for delivery attempts against a single provider.
//!
//! Each provider gets its own attempt budget. Between failed attempts on the
//! same provider the orchestrator waits an exponentially growing, capped delay:
//!
//! ```text
//! delay(attempt) = min(base_delay * backoff_factor^(attempt - 1), max_delay) * (1 ± jitter)
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Retry policy configuration for delivery operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per provider before falling through to the next.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// Default: 1000 milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum retry delay (in milliseconds).
    ///
    /// Caps the exponential backoff to prevent excessively long delays.
    ///
    /// Default: 30000 milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after every failed attempt.
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// The delay is randomized within ±`jitter_factor`. Zero disables jitter.
    ///
    /// Default: 0.0
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            backoff_factor: defaults::backoff_factor(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if another attempt on the same provider is allowed.
    ///
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Check if `attempt` (1-indexed) is the last one this provider gets.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Get the number of remaining attempts for a provider.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt)
    }

    /// Delay to wait after the failed `attempt` (1-indexed), before the next one.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "Delays are far below 2^52ms and clamped to max_delay_ms"
        )]
        let delay = {
            let millis = (self.base_delay_ms as f64) * self.backoff_factor.powi(exponent);
            let capped = if millis.is_finite() {
                millis.min(self.max_delay_ms as f64)
            } else {
                self.max_delay_ms as f64
            };
            Duration::from_millis(capped.round() as u64)
        };

        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let range = delay.as_secs_f64() * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    /// Reject values that would make the policy meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1000 // 1 second
    }

    pub const fn max_delay_ms() -> u64 {
        30_000 // 30 seconds
    }

    pub const fn backoff_factor() -> f64 {
        2.0
    }
}
