//! Seams between the alert engine and the outside world.
//!
//! The dispatcher only ever talks to persistence through
//! [`SubscriptionStore`] and to recipients through [`Notifier`]. The service
//! crate implements both over SQLite and HTTP; [`crate::mock`] provides
//! in-memory versions for tests.

use async_trait::async_trait;
use time::OffsetDateTime;

use airwatch_types::{AlertClaim, SentAlert, Subscription};

use crate::error::Result;
use crate::message::AlertMessage;

/// Access to subscriptions and their last-alert instants.
///
/// # Example
///
/// ```ignore
/// use airwatch_core::{Result, SubscriptionStore};
///
/// async fn count_watchers<S: SubscriptionStore>(store: &S, city: &str) -> Result<usize> {
///     Ok(store.active_subscriptions(city).await?.len())
/// }
/// ```
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All active subscriptions for `city`.
    async fn active_subscriptions(&self, city: &str) -> Result<Vec<Subscription>>;

    /// A single subscription by id, active or not.
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>>;

    /// Claim the right to deliver the next alert of a subscription.
    ///
    /// Succeeds only while `last_alert_at` equals `expected` and no claim
    /// newer than `stale_before` is held.
    async fn claim_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        claimed_at: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<AlertClaim>;

    /// Drop the claim taken at `claimed_at` if it is still held.
    async fn release_alert_claim(&self, id: i64, claimed_at: OffsetDateTime) -> Result<()>;

    /// Atomically replace `last_alert_at` if it still equals `expected`,
    /// clearing any claim.
    ///
    /// Returns `Ok(false)` when another writer got there first, or when
    /// `new` would move the stored instant backwards.
    async fn compare_and_set_last_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        new: OffsetDateTime,
    ) -> Result<bool>;

    /// Append a delivered alert to the log.
    async fn record_alert(&self, alert: SentAlert) -> Result<()>;
}

/// Delivers composed alerts to a subscriber.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver `message` to the owner of `subscription`.
    ///
    /// Transient failures should be reported as
    /// [`Error::Delivery`](crate::Error::Delivery) or
    /// [`Error::Timeout`](crate::Error::Timeout) so they are retried.
    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()>;
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for std::sync::Arc<T> {
    async fn active_subscriptions(&self, city: &str) -> Result<Vec<Subscription>> {
        (**self).active_subscriptions(city).await
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        (**self).get_subscription(id).await
    }

    async fn claim_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        claimed_at: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<AlertClaim> {
        (**self)
            .claim_alert(id, expected, claimed_at, stale_before)
            .await
    }

    async fn release_alert_claim(&self, id: i64, claimed_at: OffsetDateTime) -> Result<()> {
        (**self).release_alert_claim(id, claimed_at).await
    }

    async fn compare_and_set_last_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        new: OffsetDateTime,
    ) -> Result<bool> {
        (**self).compare_and_set_last_alert(id, expected, new).await
    }

    async fn record_alert(&self, alert: SentAlert) -> Result<()> {
        (**self).record_alert(alert).await
    }
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        (**self).send(message, subscription).await
    }
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        (**self).send(message, subscription).await
    }
}
