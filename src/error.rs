//! Typed error handling for delivery operations.
//!
//! This module distinguishes between:
//! - Single-attempt failures (a provider call failed) - retried per policy
//! - Breaker rejections (the provider was never called) - retried per policy
//! - Terminal failures (every provider exhausted) - reported to the caller
//! - Configuration errors - raised at construction time

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Error reported by a provider for a single delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ProviderError {
    /// Human readable failure description
    pub reason: String,
}

impl ProviderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Top-level delivery error type.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// A single attempt through a provider failed.
    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// The attempt was short-circuited by an open circuit breaker.
    #[error("Circuit breaker open for provider {provider} (retry in {}ms)", .retry_in.as_millis())]
    BreakerOpen { provider: String, retry_in: Duration },

    /// Every provider ran out of attempts. Carries the most recent error.
    #[error("All providers exhausted: {0}")]
    Exhausted(Box<DeliveryError>),

    /// Another submission of the same message is still dispatching.
    #[error("Delivery already in progress for message {0}")]
    InFlight(String),

    /// The orchestrator was built without providers.
    #[error("No providers configured")]
    NoProviders,

    /// Something unexpected escaped the delivery path (e.g. a provider panic).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if the attempt never reached the provider.
    #[must_use]
    pub const fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }

    /// Returns `true` if this error ends a submission rather than a single attempt.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Exhausted(_) | Self::InFlight(_) | Self::NoProviders | Self::Internal(_)
        )
    }

    /// Name of the provider involved in the failure, if there was one.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Provider { provider, .. } | Self::BreakerOpen { provider, .. } => Some(provider),
            Self::Exhausted(last) => last.provider(),
            Self::InFlight(_) | Self::NoProviders | Self::Internal(_) => None,
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// No configuration file was found in any of the searched locations.
    #[error("No configuration file found. Tried:\n{0}")]
    NotFound(String),

    /// A configured value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The orchestrator needs at least one provider.
    #[error("At least one provider must be configured")]
    NoProviders,
}
