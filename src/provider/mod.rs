//! Provider capability consumed by the orchestrator
//!
//! A provider is any downstream delivery channel (email, SMS, push, ...).
//! Whatever the channel reports, it is normalized here into a single
//! `Result<Receipt, ProviderError>` so the orchestration logic never has to
//! inspect channel-specific errors.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::ProviderError, types::Message};

pub use mock::{Behavior, MockProvider};

/// Proof of a successful delivery, as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Provider-assigned identifier for the delivered message
    pub id: String,
}

impl Receipt {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A delivery channel
///
/// Implementations must be safe to call repeatedly with the same message.
/// A call has no enforced timeout; it is expected to be bounded by the
/// provider itself.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name of this provider, used to key its circuit breaker
    fn name(&self) -> &str;

    /// Attempt to deliver `message` once
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] describing why this attempt failed.
    async fn attempt_delivery(&self, message: &Message) -> Result<Receipt, ProviderError>;
}
