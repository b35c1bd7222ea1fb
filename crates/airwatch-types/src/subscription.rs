//! Alert subscriptions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::category::Category;
use crate::error::{ValidationError, ValidationResult};

/// Default AQI at or above which alerts fire.
pub const DEFAULT_ALERT_THRESHOLD: f64 = 150.0;

/// Default minimum number of hours between two alerts.
pub const DEFAULT_MIN_INTERVAL_HOURS: f64 = 24.0;

/// A standing request to be alerted when a city's AQI crosses a threshold.
///
/// `last_alert_at` is owned by the subscription store. The alert evaluator
/// only reads it; the store advances it with a compare-and-set once an alert
/// has been delivered, and never moves it backwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Subscription {
    /// Store-assigned identifier (0 until persisted).
    pub id: i64,
    /// Recipient address.
    pub email: String,
    /// City being watched.
    pub city: String,
    /// AQI at or above which an alert fires.
    pub threshold: f64,
    /// Minimum hours between two alerts.
    pub min_interval_hours: f64,
    /// When the last alert was delivered, `None` if never.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub last_alert_at: Option<OffsetDateTime>,
    /// Inactive subscriptions are kept but never alerted.
    pub active: bool,
    /// When the subscription was created.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
}

impl Subscription {
    /// Create an active, never-alerted subscription with default settings.
    pub fn new(email: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            id: 0,
            email: email.into(),
            city: city.into(),
            threshold: DEFAULT_ALERT_THRESHOLD,
            min_interval_hours: DEFAULT_MIN_INTERVAL_HOURS,
            last_alert_at: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Set the alert threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the minimum re-alert interval in hours.
    #[must_use]
    pub fn with_min_interval_hours(mut self, hours: f64) -> Self {
        self.min_interval_hours = hours;
        self
    }

    /// Set the instant of the last delivered alert.
    #[must_use]
    pub fn with_last_alert_at(mut self, at: OffsetDateTime) -> Self {
        self.last_alert_at = Some(at);
        self
    }

    /// Check threshold and interval.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSubscription`] if either value is
    /// negative or not finite.
    pub fn validate(&self) -> ValidationResult<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ValidationError::InvalidSubscription(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        if !self.min_interval_hours.is_finite() || self.min_interval_hours < 0.0 {
            return Err(ValidationError::InvalidSubscription(format!(
                "min_interval_hours must be a non-negative number, got {}",
                self.min_interval_hours
            )));
        }
        Ok(())
    }

    /// The minimum re-alert interval as a duration.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::saturating_seconds_f64(self.min_interval_hours * 3600.0)
    }

    /// Earliest instant at which another alert may fire.
    ///
    /// `None` if the subscription has never alerted.
    #[must_use]
    pub fn next_alert_at(&self) -> Option<OffsetDateTime> {
        self.last_alert_at
            .map(|last| last.saturating_add(self.min_interval()))
    }
}

/// Result of trying to claim a subscription's next alert.
///
/// A claim is held while an alert is being delivered, so that a second
/// evaluator of the same subscription backs off instead of sending a
/// duplicate. It is cleared when `last_alert_at` is committed or the
/// delivery fails, and expires on its own after a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AlertClaim {
    /// The caller now holds the claim and may deliver.
    Acquired,
    /// `last_alert_at` no longer equals the expected value.
    Changed,
    /// Another evaluator holds an unexpired claim.
    InFlight,
}

/// Log entry for an alert that was delivered.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SentAlert {
    /// Store-assigned identifier (0 until persisted).
    pub id: i64,
    /// Subscription the alert was sent for.
    pub subscription_id: i64,
    /// City the alert was about.
    pub city: String,
    /// Recipient address.
    pub email: String,
    /// AQI that triggered the alert.
    pub aqi: f64,
    /// Category of that AQI.
    pub category: Category,
    /// When the alert was delivered.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub sent_at: OffsetDateTime,
}
