//! Validation errors for airwatch-types.

use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised when a value is rejected at the boundary of the engine.
///
/// Nothing is partially evaluated: any operation that returns one of these
/// has not looked at the rest of its input.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// AQI or a pollutant concentration is negative or not finite.
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Threshold or re-alert interval is negative or not finite.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Window start lies after window end.
    #[error("Invalid window: start {start} is after end {end}")]
    InvalidWindow {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

/// Result type alias using airwatch-types' ValidationError type.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
