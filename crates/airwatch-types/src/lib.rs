//! Platform-agnostic types for air quality monitoring.
//!
//! This crate provides the shared data model used by the classification and
//! alerting engine (airwatch-core), the SQLite store (airwatch-store) and the
//! REST service (airwatch-service).
//!
//! # Features
//!
//! - [`Reading`]: one AQI observation with pollutant concentrations
//! - [`Category`] and the static [`CATEGORY_TABLE`] of AQI breakpoints
//! - [`Subscription`]: a standing alert request with rate-limit state
//! - [`WindowStats`] / [`WindowSummary`]: peak/trough summaries
//! - [`ValidationError`] for values rejected at the boundary
//!
//! # Example
//!
//! ```
//! use airwatch_types::{Category, Reading};
//!
//! let reading = Reading::builder().aqi(42.0).pm25(10.1).try_build()?;
//! assert!(Category::Good.range().contains(reading.aqi));
//! # Ok::<(), airwatch_types::ValidationError>(())
//! ```

pub mod category;
pub mod error;
pub mod subscription;
pub mod types;

pub use category::{AqiRange, CATEGORY_TABLE, Category, CategoryBand};
pub use error::{ValidationError, ValidationResult};
pub use subscription::{
    AlertClaim, DEFAULT_ALERT_THRESHOLD, DEFAULT_MIN_INTERVAL_HOURS, SentAlert, Subscription,
};
pub use types::{Reading, ReadingBuilder, WindowStats, WindowSummary};
