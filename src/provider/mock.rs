//! Scriptable in-memory provider for tests and local experiments

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;

use super::{Provider, Receipt};
use crate::{error::ProviderError, types::Message};

/// How a [`MockProvider`] answers delivery attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Every attempt succeeds
    Succeed,
    /// Every attempt fails
    Fail,
    /// The first `n` attempts fail, later ones succeed
    FailTimes(u32),
    /// Each attempt succeeds with the given probability
    SuccessRate(f64),
    /// Every attempt panics
    Panic,
}

/// A provider whose outcome is scripted
///
/// Clones share the same call counter, so a clone handed to the orchestrator
/// can be inspected from the test.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: Arc<str>,
    behavior: Behavior,
    latency: Duration,
    calls: Arc<AtomicU32>,
}

impl MockProvider {
    pub fn new(name: impl Into<Arc<str>>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn succeeding(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Behavior::Succeed)
    }

    pub fn failing(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Behavior::Fail)
    }

    /// Simulate network latency on every attempt
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times `attempt_delivery` has been called
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt_delivery(&self, message: &Message) -> Result<Receipt, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let succeed = match self.behavior {
            Behavior::Succeed => true,
            Behavior::Fail => false,
            Behavior::FailTimes(n) => call > n,
            Behavior::SuccessRate(rate) => rand::rng().random_bool(rate.clamp(0.0, 1.0)),
            Behavior::Panic => panic!("{} exploded delivering {}", self.name, message.id),
        };

        if succeed {
            Ok(Receipt::new(format!("{}-{}", self.name, ulid::Ulid::new())))
        } else {
            Err(ProviderError::new(format!(
                "{} rejected message {} (attempt {call})",
                self.name, message.id
            )))
        }
    }
}
