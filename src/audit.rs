//! Audit logging for message lifecycle and breaker events
//!
//! All events are emitted as structured `tracing` events and, optionally,
//! forwarded to an [`EventSink`] attached to the orchestrator.
//!
//! ## Audit Events
//!
//! - `BreakerTransition`: A provider's circuit breaker changed state
//! - `MessageQueued`: A message was deferred to the queue
//! - `DrainPaused` / `DrainResumed`: The queue drain loop paused or resumed
//! - `DeliverySuccess`: A submission was delivered
//! - `DeliveryFailure`: A submission failed after exhausting every provider
//!
//! ## PII Redaction
//!
//! Destinations can be redacted based on the [`AuditConfig`].

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{circuit_breaker::CircuitState, types::QueueReason};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact destination addresses from audit logs (PII protection)
    #[serde(default)]
    pub redact_destination: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_destination: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Redact a destination address if redaction is enabled
#[must_use]
pub fn redact_destination(destination: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = destination.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        destination.to_string()
    }
}

/// A lifecycle event, as delivered to an [`EventSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    BreakerTransition {
        provider: String,
        from: CircuitState,
        to: CircuitState,
    },
    MessageQueued {
        message_id: String,
        destination: String,
        reason: QueueReason,
    },
    DrainPaused {
        reason: QueueReason,
        resume_in: Duration,
    },
    DrainResumed,
    DeliverySuccess {
        message_id: String,
        destination: String,
        provider: String,
        attempts: u32,
    },
    DeliveryFailure {
        message_id: String,
        destination: String,
        error: String,
        attempts: u32,
    },
}

/// Receives lifecycle events in addition to the `tracing` output
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &AuditEvent);
}

/// Emits audit events to `tracing` and an optional [`EventSink`]
#[derive(Clone, Default)]
pub struct Auditor {
    config: AuditConfig,
    sink: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("config", &self.config)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Auditor {
    #[must_use]
    pub fn new(config: AuditConfig, sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { config, sink }
    }

    fn destination(&self, destination: &str) -> String {
        redact_destination(destination, self.config.redact_destination)
    }

    fn forward(&self, event: &AuditEvent) {
        if let Some(sink) = &self.sink {
            sink.on_event(event);
        }
    }

    /// Log a breaker state change
    ///
    /// # Fields
    /// - `provider`: Provider guarded by the breaker
    /// - `from` / `to`: Previous and new state
    pub fn breaker_transition(&self, provider: &str, from: CircuitState, to: CircuitState) {
        if self.config.enabled {
            if to == CircuitState::Open {
                tracing::warn!(
                    event = "BreakerTransition",
                    provider = %provider,
                    from = %from,
                    to = %to,
                    "Audit: Circuit breaker opened"
                );
            } else {
                tracing::info!(
                    event = "BreakerTransition",
                    provider = %provider,
                    from = %from,
                    to = %to,
                    "Audit: Circuit breaker state changed"
                );
            }
        }

        self.forward(&AuditEvent::BreakerTransition {
            provider: provider.to_string(),
            from,
            to,
        });
    }

    /// Log a message being deferred to the queue
    pub fn message_queued(&self, message_id: &str, destination: &str, reason: QueueReason) {
        let destination = self.destination(destination);

        if self.config.enabled {
            tracing::info!(
                event = "MessageQueued",
                message_id = %message_id,
                destination = %destination,
                reason = %reason,
                "Audit: Message queued"
            );
        }

        self.forward(&AuditEvent::MessageQueued {
            message_id: message_id.to_string(),
            destination,
            reason,
        });
    }

    /// Log the drain loop pausing
    pub fn drain_paused(&self, reason: QueueReason, resume_in: Duration) {
        if self.config.enabled {
            tracing::warn!(
                event = "DrainPaused",
                reason = %reason,
                resume_in_ms = resume_in.as_millis(),
                "Audit: Queue drain paused"
            );
        }

        self.forward(&AuditEvent::DrainPaused { reason, resume_in });
    }

    /// Log the drain loop resuming after a pause
    pub fn drain_resumed(&self) {
        if self.config.enabled {
            tracing::info!(event = "DrainResumed", "Audit: Queue drain resumed");
        }

        self.forward(&AuditEvent::DrainResumed);
    }

    /// Log delivery success event
    ///
    /// # Fields
    /// - `message_id`: Message identifier
    /// - `destination`: Destination (redacted if configured)
    /// - `provider`: Provider that accepted the message
    /// - `delivery_attempt`: Total attempts recorded for the message
    pub fn delivery_success(
        &self,
        message_id: &str,
        destination: &str,
        provider: &str,
        attempts: u32,
    ) {
        let destination = self.destination(destination);

        if self.config.enabled {
            tracing::info!(
                event = "DeliverySuccess",
                message_id = %message_id,
                destination = %destination,
                provider = %provider,
                delivery_attempt = attempts,
                "Audit: Delivery successful"
            );
        }

        self.forward(&AuditEvent::DeliverySuccess {
            message_id: message_id.to_string(),
            destination,
            provider: provider.to_string(),
            attempts,
        });
    }

    /// Log delivery failure event
    ///
    /// Logged when a submission fails after exhausting every provider.
    pub fn delivery_failure(&self, message_id: &str, destination: &str, error: &str, attempts: u32) {
        let destination = self.destination(destination);

        if self.config.enabled {
            tracing::error!(
                event = "DeliveryFailure",
                message_id = %message_id,
                destination = %destination,
                error = %error,
                delivery_attempt = attempts,
                "Audit: Delivery failed"
            );
        }

        self.forward(&AuditEvent::DeliveryFailure {
            message_id: message_id.to_string(),
            destination,
            error: error.to_string(),
            attempts,
        });
    }
}
