//! Deferred delivery queue
//!
//! Holds messages that could not be dispatched immediately, in FIFO order.
//! At most one drain task runs at a time; the `draining` flag is the mutual
//! exclusion for it.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Configuration for the deferred queue drain loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long the drain loop pauses when every breaker is open (milliseconds)
    #[serde(default = "default_breaker_pause_ms")]
    pub breaker_pause_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            breaker_pause_ms: default_breaker_pause_ms(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn breaker_pause(&self) -> Duration {
        Duration::from_millis(self.breaker_pause_ms)
    }
}

const fn default_breaker_pause_ms() -> u64 {
    5000
}

/// FIFO queue of messages awaiting re-submission
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: Mutex<VecDeque<Message>>,
    draining: AtomicBool,
}

impl DeferredQueue {
    /// Create a new empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tail
    ///
    /// Returns `true` if the caller became responsible for starting the drain
    /// task, i.e. no drain was running.
    pub fn enqueue(&self, message: Message) -> bool {
        self.entries.lock().push_back(message);
        self.try_start_drain()
    }

    /// Remove the message at the head
    pub fn pop_front(&self) -> Option<Message> {
        self.entries.lock().pop_front()
    }

    /// Claim the drain flag
    pub fn try_start_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the drain flag once the queue was observed empty
    ///
    /// Returns `true` if the drain should keep going because a message was
    /// enqueued after the emptiness check and this caller reclaimed the flag.
    pub fn finish_drain(&self) -> bool {
        self.draining.store(false, Ordering::Release);
        !self.is_empty() && self.try_start_drain()
    }

    /// Returns `true` while a drain task is running
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Get the number of queued messages
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Identifiers of queued messages, head first
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|message| message.id.to_string())
            .collect()
    }

    /// Drop every queued message
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
