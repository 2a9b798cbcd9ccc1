//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: Determines per-provider retry budget and backoff timing

pub mod retry;

pub use retry::RetryPolicy;
