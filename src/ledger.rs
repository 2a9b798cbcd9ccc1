//! Status and idempotency bookkeeping
//!
//! The ledger is the system of record for "has this message already been
//! delivered" and for per-message observability. It is volatile: nothing
//! survives a restart.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::types::{DeliveryOutcome, DeliveryState, MessageStatus};

/// Per-state message counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub total: usize,
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Status table plus idempotency set, keyed by message identifier
#[derive(Debug, Default)]
pub struct Ledger {
    /// Latest status of every message seen
    statuses: DashMap<Arc<str>, MessageStatus>,
    /// Successful outcomes; an identifier is inserted once, on first success
    completed: DashMap<Arc<str>, DeliveryOutcome>,
    /// Identifiers with a dispatch currently running
    in_flight: DashSet<Arc<str>>,
}

/// Marks a message as dispatching until dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    ledger: &'a Ledger,
    id: Arc<str>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ledger.in_flight.remove(&self.id);
    }
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded successful outcome for `id`, if it was ever delivered
    pub fn completed(&self, id: &str) -> Option<DeliveryOutcome> {
        self.completed.get(id).map(|entry| entry.value().clone())
    }

    /// Claim the right to dispatch `id`
    ///
    /// Returns `None` if another dispatch of the same identifier is running.
    pub fn try_begin(&self, id: &Arc<str>) -> Option<InFlightGuard<'_>> {
        self.in_flight.insert(id.clone()).then(|| InFlightGuard {
            ledger: self,
            id: id.clone(),
        })
    }

    fn update(&self, id: &Arc<str>, state: DeliveryState, f: impl FnOnce(&mut MessageStatus)) {
        let mut entry = self
            .statuses
            .entry(id.clone())
            .or_insert_with(|| MessageStatus::new(id.clone(), state));
        let status = entry.value_mut();
        status.state = state;
        f(status);
    }

    /// Record that a message is waiting in the deferred queue
    pub fn mark_queued(&self, id: &Arc<str>) {
        self.update(id, DeliveryState::Queued, |_| {});
    }

    /// Record that a dispatch has started
    pub fn mark_sending(&self, id: &Arc<str>) {
        self.update(id, DeliveryState::Sending, |_| {});
    }

    /// Count one attempt through `provider`, returning the new attempt total
    pub fn record_attempt(&self, id: &Arc<str>, provider: &str) -> u32 {
        let mut attempts = 0;
        self.update(id, DeliveryState::Sending, |status| {
            status.attempts = status.attempts.saturating_add(1);
            status.last_provider = Some(provider.to_string());
            status.last_attempt_at = Some(SystemTime::now());
            attempts = status.attempts;
        });
        attempts
    }

    /// Record a successful delivery and add `id` to the idempotency set
    ///
    /// If `id` already has a recorded success that outcome is kept and returned.
    pub fn record_success(&self, id: &Arc<str>, outcome: DeliveryOutcome) -> DeliveryOutcome {
        let recorded = self
            .completed
            .entry(id.clone())
            .or_insert(outcome)
            .value()
            .clone();

        self.update(id, DeliveryState::Sent, |status| {
            status.last_provider.clone_from(&recorded.provider);
            status.last_attempt_at = Some(recorded.completed_at);
        });

        recorded
    }

    /// Record a terminal failure
    pub fn record_failure(&self, id: &Arc<str>, error: &str) {
        self.update(id, DeliveryState::Failed, |status| {
            status.last_error = Some(error.to_string());
        });
    }

    /// Record the error of a single failed attempt without changing state
    pub fn record_attempt_error(&self, id: &str, error: &str) {
        if let Some(mut entry) = self.statuses.get_mut(id) {
            entry.value_mut().last_error = Some(error.to_string());
        }
    }

    /// Get the status of a message
    pub fn status(&self, id: &str) -> Option<MessageStatus> {
        self.statuses.get(id).map(|entry| entry.value().clone())
    }

    /// Get every status, oldest first
    pub fn all(&self) -> Vec<MessageStatus> {
        let mut statuses: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        statuses
    }

    /// Count messages per state
    pub fn counts(&self) -> StateCounts {
        self.statuses
            .iter()
            .fold(StateCounts::default(), |mut counts, entry| {
                counts.total += 1;
                match entry.value().state {
                    DeliveryState::Queued => counts.queued += 1,
                    DeliveryState::Sending => counts.sending += 1,
                    DeliveryState::Sent => counts.sent += 1,
                    DeliveryState::Failed => counts.failed += 1,
                }
                counts
            })
    }

    /// Wipe all bookkeeping
    pub fn clear(&self) {
        self.statuses.clear();
        self.completed.clear();
    }
}
