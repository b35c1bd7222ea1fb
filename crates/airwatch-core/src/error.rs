//! Error types for airwatch-core.
//!
//! # Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::Validation`] | Do not retry; the input is rejected before evaluation |
//! | [`Error::ConcurrentUpdateConflict`] | Raised when the alert claim is lost twice; reported as a soft failure |
//! | [`Error::Delivery`] | Retry with backoff; the rate-limit clock is not advanced |
//! | [`Error::Timeout`] | Retry with backoff |
//! | [`Error::Store`] | Do not retry here; reported for the affected subscription only |
//!
//! A conflict that survives the single re-evaluation is reported as a soft
//! failure for that subscription. The next scheduled evaluation picks it up.

use std::time::Duration;

use thiserror::Error;

pub use airwatch_types::ValidationError;

/// Errors that can occur while evaluating or dispatching alerts.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading, subscription or window rejected at the boundary.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The alert claim was lost again after re-fetching the subscription.
    #[error("Concurrent update conflict on subscription {subscription_id}")]
    ConcurrentUpdateConflict { subscription_id: i64 },

    /// The notifier failed to deliver an alert.
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    /// An operation did not finish in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// The subscription store failed.
    #[error("Subscription store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A subscription that was expected to exist is gone.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(i64),
}

impl Error {
    /// Wrap a store backend error.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Store(Box::new(err))
    }

    /// Create a delivery error from any displayable message.
    pub fn delivery(message: impl Into<String>) -> Self {
        Error::Delivery(message.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Delivery(_) | Error::Timeout { .. })
    }
}

/// Result type alias using airwatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
