//! Orchestrator facade
//!
//! [`Orchestrator`] is the single entry point: it owns the breaker registry,
//! the admission controller, the ledger and the deferred queue, and composes
//! them around the retry and fallback loop in [`delivery`].
//!
//! ```text
//! submit ─> already sent? ──yes──> recorded outcome
//!              │ no
//!              v
//!           all breakers open? ──yes──> queue (AllBreakersOpen)
//!              │ no
//!              v
//!           token available? ──no──> queue (RateLimited)
//!              │ yes
//!              v
//!           deliver (retry + fallback) ─> Sent / Failed
//! ```

pub mod delivery;
mod drain;

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tracing::warn;

use crate::{
    audit::{Auditor, EventSink},
    circuit_breaker::CircuitBreakerRegistry,
    config::HeraldConfig,
    error::{ConfigError, DeliveryError},
    internal,
    ledger::Ledger,
    policy::RetryPolicy,
    provider::Provider,
    queue::{DeferredQueue, QueueConfig},
    rate_limiter::AdmissionController,
    service::Statistics,
    types::{DeliveryOutcome, Message, MessageStatus, QueueReason},
};

use self::delivery::Delivered;

struct Inner {
    policy: RetryPolicy,
    queue_config: QueueConfig,
    /// Providers in priority order
    providers: Vec<Arc<dyn Provider>>,
    breakers: CircuitBreakerRegistry,
    admission: AdmissionController,
    ledger: Ledger,
    queue: DeferredQueue,
    auditor: Auditor,
}

/// Resilient delivery across an ordered list of providers
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.provider_names().collect::<Vec<_>>())
            .field("queue_depth", &self.inner.queue.len())
            .field("draining", &self.inner.queue.is_draining())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator over `providers`, tried in the given order
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, `providers` is empty,
    /// or two providers share a name.
    pub fn new(config: HeraldConfig, providers: Vec<Arc<dyn Provider>>) -> Result<Self, ConfigError> {
        Self::build(config, providers, None)
    }

    /// Like [`Orchestrator::new`], also forwarding every audit event to `sink`
    ///
    /// The sink is called while breaker state is locked and must not call back
    /// into the orchestrator.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::new`].
    pub fn with_event_sink(
        config: HeraldConfig,
        providers: Vec<Arc<dyn Provider>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, providers, Some(sink))
    }

    fn build(
        config: HeraldConfig,
        providers: Vec<Arc<dyn Provider>>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        for (index, provider) in providers.iter().enumerate() {
            if providers[..index]
                .iter()
                .any(|earlier| earlier.name() == provider.name())
            {
                return Err(ConfigError::Invalid(format!(
                    "provider {} is configured more than once",
                    provider.name()
                )));
            }
        }

        let HeraldConfig {
            retry,
            admission,
            circuit_breaker,
            queue,
            audit,
        } = config;

        let auditor = Auditor::new(audit, sink);
        let breakers = CircuitBreakerRegistry::new(circuit_breaker, auditor.clone());
        for provider in &providers {
            breakers.get(provider.name());
        }

        internal!(
            level = DEBUG,
            "Orchestrator ready with {} provider(s)",
            providers.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                policy: retry,
                queue_config: queue,
                providers,
                breakers,
                admission: AdmissionController::new(&admission),
                ledger: Ledger::new(),
                queue: DeferredQueue::new(),
                auditor,
            }),
        })
    }

    fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.inner.providers.iter().map(|provider| provider.name())
    }

    fn all_breakers_rejecting(&self) -> bool {
        self.inner.breakers.all_rejecting(self.provider_names())
    }

    /// Submit a message for delivery
    ///
    /// Never fails: every outcome, including deferral to the queue, is
    /// reported through the returned [`DeliveryOutcome`]. Submitting an
    /// identifier that was already delivered returns the recorded success
    /// without calling any provider.
    #[tracing::instrument(skip_all, fields(message_id = %message.id))]
    pub async fn submit(&self, message: Message) -> DeliveryOutcome {
        let inner = &*self.inner;

        if let Some(outcome) = inner.ledger.completed(&message.id) {
            internal!("Message {} already delivered, skipping", message.id);
            return outcome;
        }

        let Some(guard) = inner.ledger.try_begin(&message.id) else {
            let error = DeliveryError::InFlight(message.id.to_string());
            warn!(error = %error, "Rejecting concurrent submission");
            return DeliveryOutcome::failed(None, error.to_string());
        };

        // Another submission may have finished between the check and the claim
        if let Some(outcome) = inner.ledger.completed(&message.id) {
            return outcome;
        }

        if self.all_breakers_rejecting() {
            drop(guard);
            return self.defer(message, QueueReason::AllBreakersOpen);
        }

        if !inner.admission.try_acquire() {
            drop(guard);
            let retry_in = inner.admission.time_until_next_token();
            return self.defer(message, QueueReason::RateLimited { retry_in });
        }

        let outcome = self.dispatch(&message).await;
        drop(guard);
        outcome
    }

    /// Run the delivery loop and record its result
    async fn dispatch(&self, message: &Message) -> DeliveryOutcome {
        let inner = &*self.inner;
        inner.ledger.mark_sending(&message.id);

        let result = AssertUnwindSafe(delivery::deliver(
            &inner.providers,
            &inner.breakers,
            &inner.policy,
            &inner.ledger,
            message,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(DeliveryError::Internal(
                delivery::panic_message(&*panic).to_string(),
            ))
        });

        let attempts = || {
            inner
                .ledger
                .status(&message.id)
                .map_or(0, |status| status.attempts)
        };

        match result {
            Ok(Delivered { provider, receipt }) => {
                let outcome = inner
                    .ledger
                    .record_success(&message.id, DeliveryOutcome::delivered(&provider, receipt.id));
                inner
                    .auditor
                    .delivery_success(&message.id, &message.to, &provider, attempts());
                outcome
            }
            Err(error) => {
                let reason = error.to_string();
                inner.ledger.record_failure(&message.id, &reason);
                inner
                    .auditor
                    .delivery_failure(&message.id, &message.to, &reason, attempts());
                DeliveryOutcome::failed(error.provider().map(str::to_string), reason)
            }
        }
    }

    /// Park a message in the deferred queue, starting the drain task if idle
    fn defer(&self, message: Message, reason: QueueReason) -> DeliveryOutcome {
        let inner = &*self.inner;
        inner.ledger.mark_queued(&message.id);
        inner.auditor.message_queued(&message.id, &message.to, reason);

        if inner.queue.enqueue(message) {
            self.spawn_drain();
        }

        DeliveryOutcome::deferred(reason)
    }

    fn spawn_drain(&self) {
        tokio::spawn(self.clone().drain());
    }

    /// Get the status of a message
    pub fn status_of(&self, id: &str) -> Option<MessageStatus> {
        self.inner.ledger.status(id)
    }

    /// Get the status of every message seen, oldest first
    pub fn all_statuses(&self) -> Vec<MessageStatus> {
        self.inner.ledger.all()
    }

    /// Snapshot of counts, quota, queue and breakers
    pub fn statistics(&self) -> Statistics {
        let inner = &*self.inner;
        Statistics {
            counts: inner.ledger.counts(),
            available_tokens: inner.admission.available_tokens(),
            queue_depth: inner.queue.len(),
            draining: inner.queue.is_draining(),
            breakers: self
                .provider_names()
                .map(|name| inner.breakers.get(name).stats())
                .collect(),
        }
    }

    /// Force every circuit breaker back to closed
    pub fn reset_breakers(&self) {
        internal!(level = INFO, "Resetting all circuit breakers");
        self.inner.breakers.reset_all();
    }

    /// Wipe the ledger and the deferred queue
    ///
    /// Breaker and admission state are left untouched.
    pub fn clear(&self) {
        internal!(level = INFO, "Clearing delivery ledger and deferred queue");
        self.inner.ledger.clear();
        self.inner.queue.clear();
    }

    /// Number of messages waiting in the deferred queue
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns `true` while the drain task is running
    pub fn is_draining(&self) -> bool {
        self.inner.queue.is_draining()
    }
}
