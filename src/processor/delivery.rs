//! Retry and provider fallback for a single message

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::{
    circuit_breaker::{BreakerError, CircuitBreakerRegistry},
    error::{DeliveryError, ProviderError},
    ledger::Ledger,
    policy::RetryPolicy,
    provider::{Provider, Receipt},
    types::Message,
};

/// A successful delivery through one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Provider that accepted the message
    pub provider: String,
    pub receipt: Receipt,
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Call the provider once, turning a panic into an ordinary failure
async fn attempt_once(provider: &dyn Provider, message: &Message) -> Result<Receipt, ProviderError> {
    AssertUnwindSafe(provider.attempt_delivery(message))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ProviderError::new(format!(
                "provider {} panicked: {}",
                provider.name(),
                panic_message(&*panic)
            )))
        })
}

/// Deliver `message` through `providers`, in order
///
/// Each provider gets up to `policy.max_attempts` tries through its circuit
/// breaker, with exponential backoff between tries. A rejection by an open
/// breaker counts as a failed try. Every try is recorded in the ledger before
/// it runs, so the message's attempt counter accumulates across providers.
///
/// # Errors
///
/// Returns [`DeliveryError::Exhausted`] carrying the most recent error once
/// every provider has used up its attempts, or [`DeliveryError::NoProviders`]
/// if `providers` is empty.
pub async fn deliver(
    providers: &[Arc<dyn Provider>],
    breakers: &CircuitBreakerRegistry,
    policy: &RetryPolicy,
    ledger: &Ledger,
    message: &Message,
) -> Result<Delivered, DeliveryError> {
    let mut last_error = None;

    for (index, provider) in providers.iter().enumerate() {
        let name = provider.name();
        let breaker = breakers.get(name);

        if index > 0 {
            info!(
                message_id = %message.id,
                provider = name,
                "Falling back to next provider"
            );
        }

        for attempt in 1..=policy.max_attempts {
            let total = ledger.record_attempt(&message.id, name);
            debug!(
                message_id = %message.id,
                provider = name,
                attempt,
                total_attempts = total,
                "Attempting delivery"
            );

            let error = match breaker
                .execute(|| attempt_once(provider.as_ref(), message))
                .await
            {
                Ok(receipt) => {
                    return Ok(Delivered {
                        provider: name.to_string(),
                        receipt,
                    });
                }
                Err(BreakerError::Open { retry_in, .. }) => DeliveryError::BreakerOpen {
                    provider: name.to_string(),
                    retry_in,
                },
                Err(BreakerError::Operation(source)) => DeliveryError::Provider {
                    provider: name.to_string(),
                    source,
                },
            };

            ledger.record_attempt_error(&message.id, &error.to_string());
            warn!(
                message_id = %message.id,
                provider = name,
                attempt,
                error = %error,
                "Delivery attempt failed"
            );

            if !policy.is_final_attempt(attempt) {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }

            last_error = Some(error);
        }

        info!(
            message_id = %message.id,
            provider = name,
            attempts = policy.max_attempts,
            "Provider exhausted its attempts"
        );
    }

    Err(last_error.map_or(DeliveryError::NoProviders, |last| {
        DeliveryError::Exhausted(Box::new(last))
    }))
}
