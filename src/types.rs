//! Type definitions for messages, outcomes and delivery status

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Informational priority of a message. The orchestrator does not reorder on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A message to be delivered
///
/// Messages are immutable once created; the orchestrator only ever clones them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Caller-assigned unique identifier, also the idempotency key
    pub id: Arc<str>,
    /// Destination address (email, phone number, device token, ...)
    pub to: Arc<str>,
    /// Optional subject line
    pub subject: Option<String>,
    /// Message body
    pub body: String,
    /// Additional payload fields passed through to providers untouched
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Informational priority
    #[serde(default)]
    pub priority: Priority,
    /// When the message was created
    pub created_at: SystemTime,
}

impl Message {
    /// Create a new message with normal priority and no metadata
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>, to: impl Into<Arc<str>>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            to: to.into(),
            subject: None,
            body: body.into(),
            metadata: BTreeMap::new(),
            priority: Priority::default(),
            created_at: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Why a submission was deferred to the queue instead of being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueReason {
    /// Every provider's circuit breaker was rejecting calls
    AllBreakersOpen,
    /// The admission controller had no quota left
    RateLimited {
        /// How long until the next token was expected
        retry_in: Duration,
    },
}

impl Display for QueueReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllBreakersOpen => write!(f, "all circuit breakers open, message queued"),
            Self::RateLimited { retry_in } => write!(
                f,
                "rate limited, message queued (next token in {}ms)",
                retry_in.as_millis()
            ),
        }
    }
}

/// The result of a delivery attempt or of a whole submission
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Whether the message was delivered
    pub success: bool,
    /// Provider-assigned receipt identifier, present on success
    pub receipt_id: Option<String>,
    /// Human readable error, present on failure
    pub error: Option<String>,
    /// Name of the provider that produced this outcome, if any was reached
    pub provider: Option<String>,
    /// When this outcome was produced
    pub completed_at: SystemTime,
    /// Set when the submission was deferred rather than dispatched
    pub queued: Option<QueueReason>,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn delivered(provider: impl Into<String>, receipt_id: impl Into<String>) -> Self {
        Self {
            success: true,
            receipt_id: Some(receipt_id.into()),
            error: None,
            provider: Some(provider.into()),
            completed_at: SystemTime::now(),
            queued: None,
        }
    }

    #[must_use]
    pub fn failed(provider: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            receipt_id: None,
            error: Some(error.into()),
            provider,
            completed_at: SystemTime::now(),
            queued: None,
        }
    }

    #[must_use]
    pub fn deferred(reason: QueueReason) -> Self {
        Self {
            success: false,
            receipt_id: None,
            error: Some(reason.to_string()),
            provider: None,
            completed_at: SystemTime::now(),
            queued: Some(reason),
        }
    }

    /// Returns `true` if the submission was deferred to the queue
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.queued.is_some()
    }
}

/// Lifecycle state of a message
///
/// ```text
///            ┌────────── all breakers open / rate limited ──────────┐
///            v                                                      │
///        ┌────────┐  drained   ┌─────────┐  success   ┌──────┐       │
/// submit │ Queued │ ─────────> │ Sending │ ─────────> │ Sent │       │
///        └────────┘            └─────────┘            └──────┘       │
///                                   │  exhausted                     │
///                                   v                                │
///                              ┌────────┐  resubmit                  │
///                              │ Failed │ ───────────────────────────┘
///                              └────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Waiting in the deferred queue
    Queued,
    /// A delivery attempt sequence is in progress
    Sending,
    /// Delivered; the identifier is in the idempotency set
    Sent,
    /// Every provider was exhausted
    Failed,
}

impl Display for DeliveryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        })
    }
}

/// Observable status of a message, one per identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    /// Identifier of the message this status tracks
    pub id: Arc<str>,
    /// Current lifecycle state
    pub state: DeliveryState,
    /// Number of provider attempts made across all submissions; never reset
    pub attempts: u32,
    /// Provider used by the most recent attempt
    pub last_provider: Option<String>,
    /// Most recent error text
    pub last_error: Option<String>,
    /// When this status was first recorded
    pub created_at: SystemTime,
    /// When the most recent attempt started, or completed on success
    pub last_attempt_at: Option<SystemTime>,
}

impl MessageStatus {
    #[must_use]
    pub fn new(id: Arc<str>, state: DeliveryState) -> Self {
        Self {
            id,
            state,
            attempts: 0,
            last_provider: None,
            last_error: None,
            created_at: SystemTime::now(),
            last_attempt_at: None,
        }
    }
}
