//! AQI classification and rate-limited alerting.
//!
//! This crate holds the domain rules of the air quality service. Everything
//! except the dispatcher is a synchronous pure function; persistence and
//! delivery are reached only through the [`SubscriptionStore`] and
//! [`Notifier`] traits.
//!
//! # Features
//!
//! - **Classification**: AQI to one of six categories via the shared table
//! - **Advisories**: one health sentence per category, plus protective actions
//! - **PM2.5 sub-index**: EPA breakpoint interpolation for readings without an AQI
//! - **Alert evaluation**: threshold and minimum-interval checks
//! - **Window statistics**: peak, trough and mean over a closed window
//! - **Dispatch**: claim, deliver with retry, then commit through compare-and-set
//!
//! # Category Table
//!
//! | Category | AQI | Color |
//! |----------|-----|-------|
//! | Good | 0-50 | green |
//! | Moderate | 51-100 | yellow |
//! | Unhealthy for Sensitive Groups | 101-150 | orange |
//! | Unhealthy | 151-200 | red |
//! | Very Unhealthy | 201-300 | purple |
//! | Hazardous | 301+ | maroon |
//!
//! # Quick Start
//!
//! ```
//! use airwatch_core::{Category, Classification, advisory, classify};
//!
//! let category = classify(163.0)?;
//! assert_eq!(category, Category::Unhealthy);
//! println!("{}: {}", category, advisory(category));
//!
//! let info = Classification::of(163.0)?;
//! assert_eq!(info.color_token, "red");
//! # Ok::<(), airwatch_core::ValidationError>(())
//! ```

pub mod advisory;
pub mod aggregate;
pub mod alert;
pub mod classify;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod mock;
pub mod pm25;
pub mod retry;
pub mod traits;

pub use advisory::{advisory, recommendations};
pub use aggregate::{aggregate, aggregate_trailing};
pub use alert::{AlertDecision, SuppressReason, should_alert};
pub use classify::{Classification, classify, exceeds_category};
pub use dispatch::{
    AlertDispatcher, DEFAULT_CLAIM_LEASE, DispatchOutcome, DispatchReport, SubscriptionOutcome,
};
pub use error::{Error, Result, ValidationError};
pub use message::AlertMessage;
pub use mock::{MemorySubscriptionStore, MockNotifier};
pub use pm25::{PM25_AQI_CEILING, aqi_from_pm25};
pub use retry::{RetryConfig, with_retry, with_timeout};
pub use traits::{Notifier, SubscriptionStore};

// Re-export from airwatch-types
pub use airwatch_types::{
    AlertClaim, CATEGORY_TABLE, Category, Reading, SentAlert, Subscription, WindowStats,
    WindowSummary,
};
