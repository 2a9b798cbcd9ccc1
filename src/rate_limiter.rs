//! Admission control using the token bucket algorithm
//!
//! A single bucket is shared by every send attempt, protecting all providers
//! from bursts beyond the configured rate.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added continuously at `capacity / window` per second
//! - Each admitted send consumes one token
//! - If less than one token is available, admission is denied (no waiting)
//! - The bucket never holds more than `capacity` tokens
//!
//! # Example
//!
//! ```text
//! capacity: 5, window: 10s
//! - Bucket starts with 5 tokens
//! - Tokens refill at 0.5/sec
//! - 5 sends are admitted immediately (burst)
//! - Then one send every 2 seconds on average
//! ```

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum tokens in the bucket, and tokens granted per window
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Window over which `capacity` tokens are refilled (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
        }
    }
}

impl AdmissionConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the capacity or window is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "admission.capacity must be at least 1".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "admission.window_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

const fn default_capacity() -> u32 {
    10
}

const fn default_window_ms() -> u64 {
    1000
}

/// Token bucket state
#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum tokens
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new, full token bucket
    fn new(config: &AdmissionConfig) -> Self {
        let capacity = f64::from(config.capacity);
        #[allow(clippy::cast_precision_loss, reason = "Window sizes are far below 2^52ms")]
        let window_secs = (config.window_ms as f64 / 1000.0).max(f64::MIN_POSITIVE);

        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / window_secs,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to consume one token, returns true if successful
    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Calculate wait time until a token becomes available, rounded up to the millisecond
    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        let millis = (tokens_needed / self.refill_rate * 1000.0).ceil();

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "millis is positive and bounded by the window size"
        )]
        let millis = millis as u64;
        Duration::from_millis(millis)
    }
}

/// Shared admission controller
///
/// Every check is non-blocking; callers decide what to do on denial.
#[derive(Debug)]
pub struct AdmissionController {
    bucket: Mutex<TokenBucket>,
}

impl AdmissionController {
    /// Create a new admission controller with a full bucket
    #[must_use]
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config)),
        }
    }

    /// Try to admit one send attempt
    ///
    /// Refill always runs, even when admission is denied.
    pub fn try_acquire(&self) -> bool {
        let admitted = self.bucket.lock().try_consume();
        if !admitted {
            tracing::debug!("Admission denied, no tokens available");
        }
        admitted
    }

    /// Time until at least one token is available, zero if one is available now
    pub fn time_until_next_token(&self) -> Duration {
        self.bucket.lock().time_until_available()
    }

    /// Whole tokens currently available, for display only
    pub fn available_tokens(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        bucket.refill();

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "tokens is within [0, capacity] and capacity fits in u32"
        )]
        let available = bucket.tokens.floor() as u64;
        available
    }

    /// Get current stats (for monitoring/debugging)
    pub fn stats(&self) -> AdmissionStats {
        let mut bucket = self.bucket.lock();
        bucket.refill();

        AdmissionStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        }
    }
}

/// Statistics for the admission controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity
    pub capacity: f64,
    /// Refill rate (tokens per second)
    pub refill_rate: f64,
}
