//! Service trait abstraction for read-only orchestrator queries
//!
//! Control surfaces (an admin endpoint, a CLI) depend on
//! [`StatusQueryService`] instead of the concrete [`Orchestrator`], which keeps
//! them mockable in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! fn report(service: &dyn StatusQueryService) -> usize {
//!     service.statistics().counts.failed
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreakerStats, ledger::StateCounts, processor::Orchestrator,
    types::MessageStatus,
};

/// Aggregate snapshot of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Messages per lifecycle state
    pub counts: StateCounts,
    /// Whole tokens currently available to new submissions
    pub available_tokens: u64,
    /// Messages waiting in the deferred queue
    pub queue_depth: usize,
    /// Whether the drain task is running
    pub draining: bool,
    /// One entry per provider, in priority order
    pub breakers: Vec<CircuitBreakerStats>,
}

/// Read-only view over delivery state
pub trait StatusQueryService: Send + Sync {
    /// Get the status of a message
    ///
    /// Returns `None` if the message was never submitted.
    fn status_of(&self, id: &str) -> Option<MessageStatus>;

    /// Get the status of every message seen, oldest first
    fn all_statuses(&self) -> Vec<MessageStatus>;

    /// Get an aggregate snapshot
    fn statistics(&self) -> Statistics;

    /// Get the number of messages in the deferred queue
    fn queue_len(&self) -> usize;
}

impl StatusQueryService for Orchestrator {
    fn status_of(&self, id: &str) -> Option<MessageStatus> {
        Self::status_of(self, id)
    }

    fn all_statuses(&self) -> Vec<MessageStatus> {
        Self::all_statuses(self)
    }

    fn statistics(&self) -> Statistics {
        Self::statistics(self)
    }

    fn queue_len(&self) -> usize {
        Self::queue_len(self)
    }
}
