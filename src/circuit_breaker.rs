//! Per-provider circuit breaker to stop hammering failing providers
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, all calls allowed
//! - **Open**: Circuit tripped due to failures, calls rejected without reaching the provider
//! - **Half-Open**: Testing recovery, calls allowed to probe provider health
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  threshold failures within window  ┌──────┐
//! │ Closed  │ ─────────────────────────────────> │ Open │
//! └─────────┘                                    └──────┘
//!     ^                                             │
//!     │                                             │ reset timeout elapsed since last failure
//!     │                                             v
//!     │  success_threshold consecutive    ┌───────────────┐
//!     └───────────────────────────────────│  Half-Open    │
//!                                         └───────────────┘
//!                                                 │
//!                                                 │ any single failure
//!                                                 v
//!                                             ┌──────┐
//!                                             │ Open │
//!                                             └──────┘
//! ```
//!
//! A closed breaker needs `failure_threshold` failures inside the monitoring
//! window to trip, while a half-open breaker reopens on the first failed probe.

use std::{
    collections::VecDeque,
    fmt::{self, Display, Formatter},
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{audit::Auditor, error::ConfigError};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of failures within the monitoring window required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time window for counting failures (milliseconds)
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,

    /// How long after the last failure the circuit stays open before probing (milliseconds)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Number of consecutive successes needed to close circuit from half-open
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Per-provider circuit breaker overrides
    #[serde(default)]
    pub provider_overrides: AHashMap<String, ProviderCircuitBreakerConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            monitoring_window_ms: default_monitoring_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
            provider_overrides: AHashMap::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Resolve the effective settings for a provider
    #[must_use]
    pub fn for_provider(&self, provider: &str) -> ProviderCircuitBreakerConfig {
        self.provider_overrides
            .get(provider)
            .cloned()
            .unwrap_or(ProviderCircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                monitoring_window_ms: self.monitoring_window_ms,
                reset_timeout_ms: self.reset_timeout_ms,
                success_threshold: self.success_threshold,
            })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a threshold is zero, globally or in an override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        std::iter::once(("default", &self.for_provider("")))
            .chain(
                self.provider_overrides
                    .iter()
                    .map(|(name, config)| (name.as_str(), config)),
            )
            .try_for_each(|(name, config)| {
                if config.failure_threshold == 0 || config.success_threshold == 0 {
                    Err(ConfigError::Invalid(format!(
                        "circuit_breaker thresholds for {name} must be at least 1"
                    )))
                } else {
                    Ok(())
                }
            })
    }
}

const fn default_failure_threshold() -> u32 {
    5 // Trip circuit after 5 failures
}

const fn default_monitoring_window_ms() -> u64 {
    60_000 // Count failures within 60 second window
}

const fn default_reset_timeout_ms() -> u64 {
    30_000 // Probe again 30 seconds after the last failure
}

const fn default_success_threshold() -> u32 {
    2 // Close circuit after 2 consecutive successes in half-open state
}

/// Per-provider circuit breaker configuration override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCircuitBreakerConfig {
    /// Failure threshold for this provider
    pub failure_threshold: u32,
    /// Monitoring window for this provider (milliseconds)
    pub monitoring_window_ms: u64,
    /// Reset timeout for this provider (milliseconds)
    pub reset_timeout_ms: u64,
    /// Success threshold for this provider
    pub success_threshold: u32,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Circuit tripped - reject all calls immediately
    Open,
    /// Testing recovery - calls allowed as probes
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call; the operation was not invoked
    #[error("circuit breaker open for {provider}")]
    Open {
        provider: Arc<str>,
        /// Time left until the breaker will admit a probe
        retry_in: Duration,
    },

    /// The operation ran and failed
    #[error(transparent)]
    Operation(E),
}

/// Mutable breaker bookkeeping, only touched under the breaker's lock
#[derive(Debug)]
struct CircuitBreakerData {
    /// Current state of the circuit
    state: CircuitState,
    /// Timestamps of failures within the monitoring window, oldest first
    failures: VecDeque<Instant>,
    /// Number of consecutive failures
    consecutive_failures: u32,
    /// Number of consecutive successes in half-open state
    consecutive_successes: u32,
    /// Timestamp of the most recent failure
    last_failure_at: Option<Instant>,
}

impl CircuitBreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
        }
    }

    /// Drop failures older than the monitoring window
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time left before an open circuit may be probed, zero if expired
    fn remaining_cooldown(&self, reset_timeout: Duration, now: Instant) -> Duration {
        self.last_failure_at.map_or(Duration::ZERO, |last| {
            reset_timeout.saturating_sub(now.duration_since(last))
        })
    }
}

/// Circuit breaker guarding a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: Arc<str>,
    config: ProviderCircuitBreakerConfig,
    data: Mutex<CircuitBreakerData>,
    auditor: Auditor,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in closed state
    #[must_use]
    pub fn new(
        provider: impl Into<Arc<str>>,
        config: ProviderCircuitBreakerConfig,
        auditor: Auditor,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            data: Mutex::new(CircuitBreakerData::new()),
            auditor,
        }
    }

    /// Name of the provider this breaker guards
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    const fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.config.monitoring_window_ms)
    }

    const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reset_timeout_ms)
    }

    fn transition(&self, data: &mut CircuitBreakerData, to: CircuitState) {
        let from = data.state;
        data.state = to;
        if from != to {
            self.auditor.breaker_transition(&self.provider, from, to);
        }
    }

    /// Run `operation` through the breaker
    ///
    /// The lock is only held while deciding whether to admit the call and while
    /// recording its result, never while the operation runs.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without invoking `operation` if the circuit
    /// is open and its cool-down has not expired, or [`BreakerError::Operation`]
    /// carrying the operation's own error after recording the failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.acquire() {
            return Err(BreakerError::Open {
                provider: self.provider.clone(),
                retry_in,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(BreakerError::Operation(error))
            }
        }
    }

    /// Decide whether a call may proceed
    ///
    /// Returns the remaining cool-down if the circuit is open.
    fn acquire(&self) -> Result<(), Duration> {
        let mut data = self.data.lock();
        match data.state {
            CircuitState::Open => {
                let remaining = data.remaining_cooldown(self.reset_timeout(), Instant::now());
                if remaining.is_zero() {
                    data.consecutive_successes = 0;
                    self.transition(&mut data, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Record a successful call
    fn record_success(&self) {
        let mut data = self.data.lock();
        data.consecutive_failures = 0;
        data.prune(self.monitoring_window(), Instant::now());

        match data.state {
            CircuitState::HalfOpen => {
                data.consecutive_successes += 1;

                if data.consecutive_successes >= self.config.success_threshold {
                    data.consecutive_successes = 0;
                    data.failures.clear();
                    self.transition(&mut data, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A probe admitted while half-open finished after another probe reopened the circuit
                tracing::debug!(
                    provider = %self.provider,
                    "Success recorded while circuit is open"
                );
            }
            CircuitState::Closed => {}
        }
    }

    /// Record a failed call
    fn record_failure(&self) {
        let now = Instant::now();
        let mut data = self.data.lock();
        data.consecutive_failures += 1;
        data.last_failure_at = Some(now);
        data.failures.push_back(now);
        data.prune(self.monitoring_window(), now);

        match data.state {
            CircuitState::HalfOpen => {
                data.consecutive_successes = 0;
                self.transition(&mut data, CircuitState::Open);
            }
            CircuitState::Closed => {
                let failures = u32::try_from(data.failures.len()).unwrap_or(u32::MAX);
                if failures >= self.config.failure_threshold {
                    tracing::debug!(
                        provider = %self.provider,
                        failure_count = failures,
                        threshold = self.config.failure_threshold,
                        "Failure threshold reached"
                    );
                    self.transition(&mut data, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Get current circuit state without triggering any transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    /// Returns `true` if a call made now would be rejected
    ///
    /// An open circuit whose cool-down has expired is not rejecting: the next
    /// call will move it to half-open.
    #[must_use]
    pub fn is_rejecting(&self) -> bool {
        let data = self.data.lock();
        data.state == CircuitState::Open
            && !data
                .remaining_cooldown(self.reset_timeout(), Instant::now())
                .is_zero()
    }

    /// Force the circuit closed and forget all failure history
    ///
    /// This is an administrative override, not a normal transition.
    pub fn force_close(&self) {
        let mut data = self.data.lock();
        data.failures.clear();
        data.consecutive_failures = 0;
        data.consecutive_successes = 0;
        data.last_failure_at = None;
        self.transition(&mut data, CircuitState::Closed);
    }

    /// Get statistics for this breaker (for monitoring/debugging)
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut data = self.data.lock();
        data.prune(self.monitoring_window(), Instant::now());
        CircuitBreakerStats {
            provider: self.provider.to_string(),
            state: data.state,
            failure_count: u32::try_from(data.failures.len()).unwrap_or(u32::MAX),
            consecutive_failures: data.consecutive_failures,
            consecutive_successes: data.consecutive_successes,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Provider guarded by the breaker
    pub provider: String,
    /// Current circuit state
    pub state: CircuitState,
    /// Failures within the monitoring window
    pub failure_count: u32,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Number of consecutive successes in half-open state
    pub consecutive_successes: u32,
}

/// Per-provider circuit breaker registry
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    /// Global configuration
    config: CircuitBreakerConfig,
    /// Per-provider breakers
    breakers: DashMap<Arc<str>, Arc<CircuitBreaker>>,
    auditor: Auditor,
}

impl CircuitBreakerRegistry {
    /// Create a new, empty registry
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, auditor: Auditor) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            auditor,
        }
    }

    /// Get or create the circuit breaker for a provider
    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(provider) {
            return breaker.clone();
        }

        self.breakers
            .entry(Arc::from(provider))
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider,
                    self.config.for_provider(provider),
                    self.auditor.clone(),
                ))
            })
            .clone()
    }

    /// Returns `true` if every named provider's breaker is currently rejecting calls
    ///
    /// An empty provider list is never considered all-open.
    pub fn all_rejecting<'a>(&self, providers: impl IntoIterator<Item = &'a str>) -> bool {
        let mut any = false;
        for provider in providers {
            any = true;
            if !self.get(provider).is_rejecting() {
                return false;
            }
        }
        any
    }

    /// Force every breaker back to closed
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().force_close();
        }
    }

    /// Get statistics for a provider, if its breaker exists
    #[must_use]
    pub fn stats(&self, provider: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(provider).map(|breaker| breaker.stats())
    }
}
