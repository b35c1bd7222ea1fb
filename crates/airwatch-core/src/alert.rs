//! Alert evaluation.
//!
//! [`should_alert`] decides whether a subscription fires for a reading. It
//! is a pure function of its inputs: the subscription is only read, and the
//! returned [`AlertDecision::Fire`] carries the instant the caller must
//! persist once the alert has actually been delivered.
//!
//! # Example
//!
//! ```
//! use airwatch_core::{AlertDecision, Reading, Subscription, SuppressReason, should_alert};
//! use time::{Duration, OffsetDateTime};
//!
//! let now = OffsetDateTime::now_utc();
//! let reading = Reading::builder().aqi(210.0).timestamp(now).build();
//!
//! let fresh = Subscription::new("a@example.com", "Lahore");
//! assert_eq!(should_alert(&reading, &fresh, now)?, AlertDecision::Fire { last_alert_at: now });
//!
//! let recent = fresh.with_last_alert_at(now - Duration::hours(2));
//! assert_eq!(
//!     should_alert(&reading, &recent, now)?,
//!     AlertDecision::Suppress(SuppressReason::RateLimited)
//! );
//! # Ok::<(), airwatch_core::ValidationError>(())
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use airwatch_types::{Reading, Subscription, ValidationResult};

/// Why a subscription did not fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// The reading is below the subscription threshold.
    BelowThreshold,
    /// The minimum interval since the last alert has not elapsed.
    RateLimited,
    /// The subscription has been deactivated.
    Inactive,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SuppressReason::BelowThreshold => "below threshold",
            SuppressReason::RateLimited => "rate limited",
            SuppressReason::Inactive => "subscription inactive",
        };
        f.write_str(text)
    }
}

/// Outcome of evaluating one subscription against one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AlertDecision {
    /// Send an alert, then persist `last_alert_at`.
    Fire {
        #[serde(with = "time::serde::rfc3339")]
        last_alert_at: OffsetDateTime,
    },
    /// Do not send.
    Suppress(SuppressReason),
}

impl AlertDecision {
    /// Whether this decision fires an alert.
    pub fn is_fire(&self) -> bool {
        matches!(self, AlertDecision::Fire { .. })
    }
}

/// Decide whether `subscription` should alert for `reading` at `now`.
///
/// 1. `reading.aqi < threshold` suppresses with [`SuppressReason::BelowThreshold`],
///    whatever the subscription's state.
/// 2. Inactive subscriptions never fire.
/// 3. A subscription that never alerted fires.
/// 4. Otherwise it fires once at least `min_interval_hours` have elapsed
///    since `last_alert_at`. A `now` earlier than `last_alert_at` (clock
///    skew) counts as not elapsed, so the persisted instant never moves
///    backwards.
///
/// # Errors
///
/// Returns `InvalidReading` or `InvalidSubscription` before any evaluation
/// if either input is malformed.
pub fn should_alert(
    reading: &Reading,
    subscription: &Subscription,
    now: OffsetDateTime,
) -> ValidationResult<AlertDecision> {
    reading.validate()?;
    subscription.validate()?;

    if reading.aqi < subscription.threshold {
        debug!(
            "Subscription {}: AQI {} below threshold {}",
            subscription.id, reading.aqi, subscription.threshold
        );
        return Ok(AlertDecision::Suppress(SuppressReason::BelowThreshold));
    }

    if !subscription.active {
        return Ok(AlertDecision::Suppress(SuppressReason::Inactive));
    }

    let Some(last) = subscription.last_alert_at else {
        return Ok(AlertDecision::Fire { last_alert_at: now });
    };

    let elapsed = now - last;
    if elapsed >= subscription.min_interval() {
        Ok(AlertDecision::Fire { last_alert_at: now })
    } else {
        debug!(
            "Subscription {}: rate limited, last alert {} ago (interval {}h)",
            subscription.id, elapsed, subscription.min_interval_hours
        );
        Ok(AlertDecision::Suppress(SuppressReason::RateLimited))
    }
}
