//! Resilient message delivery across unreliable providers
//!
//! This crate provides functionality to:
//! - Deliver a message through an ordered list of providers, retrying each
//!   with exponential backoff before falling back to the next
//! - Stop calling failing providers with per-provider circuit breakers
//! - Throttle sends with a shared token bucket
//! - Defer messages that cannot be sent right now and drain them in the background
//! - Make resubmission of an already delivered message a no-op
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(
//!     HeraldConfig::load(HeraldConfig::find_config_file()?)?,
//!     vec![Arc::new(email) as Arc<dyn Provider>, Arc::new(sms)],
//! )?;
//!
//! let outcome = orchestrator.submit(Message::new("m1", "x@y.com", "hello")).await;
//! ```

pub mod audit;
pub mod circuit_breaker;
pub mod config;
mod error;
pub mod ledger;
pub mod logging;
pub mod policy;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod rate_limiter;
mod service;
mod types;

pub use tracing;

// Re-export audit types
pub use audit::{AuditConfig, AuditEvent, EventSink};
// Re-export breaker types
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::HeraldConfig;
// Re-export error types
pub use error::{ConfigError, DeliveryError, ProviderError};
pub use ledger::StateCounts;
pub use policy::RetryPolicy;
// Re-export core types
pub use processor::Orchestrator;
pub use provider::{Behavior, MockProvider, Provider, Receipt};
pub use queue::QueueConfig;
pub use rate_limiter::AdmissionConfig;
pub use service::{Statistics, StatusQueryService};
pub use types::{
    DeliveryOutcome, DeliveryState, Message, MessageStatus, Priority, QueueReason,
};
