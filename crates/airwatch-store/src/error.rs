//! Error types for airwatch-store.

use std::path::PathBuf;

use airwatch_types::ValidationError;

/// Result type for airwatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in airwatch-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Value rejected before it reached the database.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// City name is empty.
    #[error("Invalid city name: {0:?}")]
    InvalidCity(String),

    /// City not found in database.
    #[error("City not found: {0}")]
    CityNotFound(String),

    /// Subscription not found in database.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(i64),
}
