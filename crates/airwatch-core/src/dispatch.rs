//! Alert dispatch.
//!
//! [`AlertDispatcher`] runs the evaluator for every active subscription of a
//! city and delivers the alerts that fire. Each subscription goes through:
//!
//! 1. evaluate ([`should_alert`])
//! 2. claim the alert with `claim_alert(id, last_alert_at, now, ..)`
//! 3. deliver, with the configured [`RetryConfig`] and optional timeout
//! 4. commit `last_alert_at` with `compare_and_set_last_alert(id, previous, now)`,
//!    which also clears the claim
//! 5. append to the sent-alert log
//!
//! The claim is what keeps two concurrent evaluators from both delivering:
//! only one of them acquires it, and the other reports
//! [`DispatchOutcome::InFlight`]. A failed delivery releases the claim and
//! never advances the rate-limit clock. A claim lost because `last_alert_at`
//! changed triggers exactly one re-fetch and re-evaluation; losing it again
//! is reported as [`DispatchOutcome::Conflict`] for the next run to pick up.
//! Store failures are reported per subscription and never discard the
//! outcomes of the others.

use futures::future::join_all;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use airwatch_types::{AlertClaim, Category, Reading, SentAlert, Subscription};

use crate::alert::{AlertDecision, SuppressReason, should_alert};
use crate::classify::classify;
use crate::error::{Error, Result};
use crate::message::AlertMessage;
use crate::retry::{RetryConfig, with_retry, with_timeout};
use crate::traits::{Notifier, SubscriptionStore};

/// How long a claim blocks other evaluators if its holder never commits
/// or releases it.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::minutes(10);

/// What happened to one subscription during a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Delivered and committed.
    Sent {
        #[serde(with = "time::serde::rfc3339")]
        last_alert_at: OffsetDateTime,
    },
    /// Delivered, but `last_alert_at` had already moved on when committing,
    /// so the alert is logged without advancing the clock. Only happens
    /// after the claim lease expired mid-delivery.
    SentUncommitted,
    /// The evaluator declined to fire.
    Suppressed { reason: SuppressReason },
    /// After a lost claim, the fresh state no longer fires.
    Superseded,
    /// Another evaluator is delivering this subscription's alert.
    InFlight,
    /// Every delivery attempt failed; `last_alert_at` is unchanged.
    DeliveryFailed { error: String },
    /// The claim was lost twice.
    Conflict,
    /// The store failed while claiming or committing.
    StoreFailed { error: String, delivered: bool },
    /// The subscription failed validation and was not evaluated.
    Invalid { error: String },
}

impl DispatchOutcome {
    /// Whether an alert went out and was accounted for.
    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Sent { .. } | DispatchOutcome::SentUncommitted
        )
    }

    fn from_error(subscription_id: i64, err: Error) -> Self {
        match err {
            Error::ConcurrentUpdateConflict { .. } => {
                warn!("{}", err);
                DispatchOutcome::Conflict
            }
            other => {
                warn!(
                    "Subscription {}: store failed before delivery: {}",
                    subscription_id, other
                );
                DispatchOutcome::StoreFailed {
                    error: other.to_string(),
                    delivered: false,
                }
            }
        }
    }
}

/// Outcome for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionOutcome {
    pub subscription_id: i64,
    pub email: String,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// Summary of a dispatch run for one city and reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub city: String,
    pub aqi: f64,
    pub category: Category,
    #[serde(with = "time::serde::rfc3339")]
    pub evaluated_at: OffsetDateTime,
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl DispatchReport {
    /// Number of alerts delivered and logged.
    pub fn sent(&self) -> usize {
        self.count(|o| o.is_sent())
    }

    /// Number of subscriptions that did not fire, including those superseded
    /// or already being delivered elsewhere.
    pub fn suppressed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                DispatchOutcome::Suppressed { .. }
                    | DispatchOutcome::Superseded
                    | DispatchOutcome::InFlight
            )
        })
    }

    /// Number of subscriptions that should be retried on a later run.
    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                DispatchOutcome::DeliveryFailed { .. }
                    | DispatchOutcome::Conflict
                    | DispatchOutcome::StoreFailed { .. }
                    | DispatchOutcome::Invalid { .. }
            )
        })
    }

    /// Outcome for a given subscription id.
    pub fn outcome_for(&self, subscription_id: i64) -> Option<&DispatchOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.subscription_id == subscription_id)
            .map(|o| &o.outcome)
    }

    fn count(&self, pred: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

enum ClaimStep {
    Deliver {
        subscription: Subscription,
        fire_at: OffsetDateTime,
    },
    Skip(DispatchOutcome),
}

/// Evaluates, delivers and commits alerts for a city.
#[derive(Debug)]
pub struct AlertDispatcher<S, N> {
    store: S,
    notifier: N,
    retry: RetryConfig,
    delivery_timeout: Option<std::time::Duration>,
    claim_lease: Duration,
}

impl<S, N> AlertDispatcher<S, N>
where
    S: SubscriptionStore,
    N: Notifier,
{
    /// Create a dispatcher with [`RetryConfig::for_delivery`], no delivery
    /// timeout and [`DEFAULT_CLAIM_LEASE`].
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            store,
            notifier,
            retry: RetryConfig::for_delivery(),
            delivery_timeout: None,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Replace the delivery retry policy.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each delivery attempt; expiry counts as a retryable timeout.
    #[must_use]
    pub fn with_delivery_timeout(mut self, limit: std::time::Duration) -> Self {
        self.delivery_timeout = Some(limit);
        self
    }

    /// How long an unreleased claim blocks other evaluators.
    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn delivery_timeout(&self) -> Option<std::time::Duration> {
        self.delivery_timeout
    }

    /// Evaluate every active subscription of `city` against `reading`.
    ///
    /// Subscriptions are processed concurrently; each one's outcome is
    /// independent of the others.
    ///
    /// # Errors
    ///
    /// Fails only if the reading is invalid or the subscriptions cannot be
    /// listed. Delivery failures, conflicts and store failures are reported
    /// per subscription instead.
    pub async fn dispatch(
        &self,
        city: &str,
        reading: &Reading,
        now: OffsetDateTime,
    ) -> Result<DispatchReport> {
        reading.validate()?;
        let category = classify(reading.aqi)?;
        let subscriptions = self.store.active_subscriptions(city).await?;

        debug!(
            "Dispatching {} (AQI {}) to {} subscription(s) via {}",
            city,
            reading.aqi,
            subscriptions.len(),
            self.notifier.name()
        );

        let message = AlertMessage::compose(city, reading, category);
        let results = join_all(
            subscriptions
                .iter()
                .map(|sub| self.dispatch_one(sub, reading, &message, now)),
        )
        .await;

        let outcomes = subscriptions
            .iter()
            .zip(results)
            .map(|(sub, result)| SubscriptionOutcome {
                subscription_id: sub.id,
                email: sub.email.clone(),
                outcome: result.unwrap_or_else(|e| DispatchOutcome::from_error(sub.id, e)),
            })
            .collect();

        let report = DispatchReport {
            city: city.to_string(),
            aqi: reading.aqi,
            category,
            evaluated_at: now,
            outcomes,
        };

        if report.sent() > 0 || report.failed() > 0 {
            info!(
                "{}: AQI {} ({}), {} sent, {} suppressed, {} failed",
                city,
                reading.aqi,
                category,
                report.sent(),
                report.suppressed(),
                report.failed()
            );
        }

        Ok(report)
    }

    async fn dispatch_one(
        &self,
        subscription: &Subscription,
        reading: &Reading,
        message: &AlertMessage,
        now: OffsetDateTime,
    ) -> Result<DispatchOutcome> {
        let fire_at = match should_alert(reading, subscription, now) {
            Ok(AlertDecision::Fire { last_alert_at }) => last_alert_at,
            Ok(AlertDecision::Suppress(reason)) => {
                return Ok(DispatchOutcome::Suppressed { reason });
            }
            Err(e) => {
                warn!("Skipping subscription {}: {}", subscription.id, e);
                return Ok(DispatchOutcome::Invalid {
                    error: e.to_string(),
                });
            }
        };

        let (subscription, fire_at) = match self.claim(subscription, fire_at, reading, now).await? {
            ClaimStep::Deliver {
                subscription,
                fire_at,
            } => (subscription, fire_at),
            ClaimStep::Skip(outcome) => return Ok(outcome),
        };

        let delivery = with_retry(&self.retry, "send_alert", || {
            self.deliver(message, &subscription)
        })
        .await;
        if let Err(e) = delivery {
            warn!(
                "Alert for subscription {} ({}) not delivered: {}",
                subscription.id, subscription.email, e
            );
            self.release(subscription.id, now).await;
            return Ok(DispatchOutcome::DeliveryFailed {
                error: e.to_string(),
            });
        }

        Ok(self.commit(&subscription, message, fire_at, now).await)
    }

    /// Take the claim, re-evaluating once if `last_alert_at` moved.
    async fn claim(
        &self,
        subscription: &Subscription,
        fire_at: OffsetDateTime,
        reading: &Reading,
        now: OffsetDateTime,
    ) -> Result<ClaimStep> {
        let id = subscription.id;
        let stale_before = now - self.claim_lease;

        match self
            .store
            .claim_alert(id, subscription.last_alert_at, now, stale_before)
            .await?
        {
            AlertClaim::Acquired => {
                return Ok(ClaimStep::Deliver {
                    subscription: subscription.clone(),
                    fire_at,
                });
            }
            AlertClaim::InFlight => {
                debug!("Subscription {}: alert already being delivered", id);
                return Ok(ClaimStep::Skip(DispatchOutcome::InFlight));
            }
            AlertClaim::Changed => {}
        }

        debug!("Subscription {}: last_alert_at changed, re-evaluating", id);
        let Some(fresh) = self.store.get_subscription(id).await? else {
            return Ok(ClaimStep::Skip(DispatchOutcome::Superseded));
        };

        let fire_at = match should_alert(reading, &fresh, now) {
            Ok(AlertDecision::Fire { last_alert_at }) => last_alert_at,
            Ok(AlertDecision::Suppress(_)) => {
                return Ok(ClaimStep::Skip(DispatchOutcome::Superseded));
            }
            Err(e) => {
                return Ok(ClaimStep::Skip(DispatchOutcome::Invalid {
                    error: e.to_string(),
                }));
            }
        };

        match self
            .store
            .claim_alert(id, fresh.last_alert_at, now, stale_before)
            .await?
        {
            AlertClaim::Acquired => Ok(ClaimStep::Deliver {
                subscription: fresh,
                fire_at,
            }),
            AlertClaim::InFlight => Ok(ClaimStep::Skip(DispatchOutcome::InFlight)),
            AlertClaim::Changed => Err(Error::ConcurrentUpdateConflict {
                subscription_id: id,
            }),
        }
    }

    async fn deliver(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        match self.delivery_timeout {
            Some(limit) => {
                with_timeout(limit, "send_alert", self.notifier.send(message, subscription)).await
            }
            None => self.notifier.send(message, subscription).await,
        }
    }

    async fn commit(
        &self,
        subscription: &Subscription,
        message: &AlertMessage,
        fire_at: OffsetDateTime,
        claimed_at: OffsetDateTime,
    ) -> DispatchOutcome {
        let id = subscription.id;
        let committed = self
            .store
            .compare_and_set_last_alert(id, subscription.last_alert_at, fire_at)
            .await;

        let outcome = match committed {
            Ok(true) => DispatchOutcome::Sent {
                last_alert_at: fire_at,
            },
            Ok(false) => {
                warn!(
                    "Subscription {}: alert delivered after its claim expired, clock not advanced",
                    id
                );
                self.release(id, claimed_at).await;
                DispatchOutcome::SentUncommitted
            }
            Err(e) => {
                warn!("Subscription {}: alert delivered but not committed: {}", id, e);
                DispatchOutcome::StoreFailed {
                    error: e.to_string(),
                    delivered: true,
                }
            }
        };

        self.record(subscription, message, fire_at).await;
        outcome
    }

    async fn release(&self, id: i64, claimed_at: OffsetDateTime) {
        if let Err(e) = self.store.release_alert_claim(id, claimed_at).await {
            warn!(
                "Subscription {}: claim not released, held until the lease expires: {}",
                id, e
            );
        }
    }

    async fn record(
        &self,
        subscription: &Subscription,
        message: &AlertMessage,
        sent_at: OffsetDateTime,
    ) {
        let alert = SentAlert {
            id: 0,
            subscription_id: subscription.id,
            city: message.city.clone(),
            email: subscription.email.clone(),
            aqi: message.aqi,
            category: message.category,
            sent_at,
        };
        if let Err(e) = self.store.record_alert(alert).await {
            warn!(
                "Alert for subscription {} sent but not logged: {}",
                subscription.id, e
            );
        }
    }
}
