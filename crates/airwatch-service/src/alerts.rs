//! Alert dispatch over the SQLite store.
//!
//! [`StoreSubscriptions`] adapts the shared [`Store`](airwatch_store::Store)
//! to [`SubscriptionStore`]. The store mutex is taken per call and never held
//! while a notifier is delivering.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::warn;

use airwatch_core::{
    AlertClaim, AlertDispatcher, DispatchReport, Error, Notifier, Reading, Result, SentAlert,
    Subscription, SubscriptionStore,
};

use crate::state::AppState;

/// [`SubscriptionStore`] backed by the application's SQLite store.
#[derive(Clone)]
pub struct StoreSubscriptions(pub Arc<AppState>);

fn store_error(err: airwatch_store::Error) -> Error {
    match err {
        airwatch_store::Error::SubscriptionNotFound(id) => Error::SubscriptionNotFound(id),
        other => Error::store(other),
    }
}

#[async_trait]
impl SubscriptionStore for StoreSubscriptions {
    async fn active_subscriptions(&self, city: &str) -> Result<Vec<Subscription>> {
        let store = self.0.store.lock().await;
        store.active_subscriptions(city).map_err(store_error)
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let store = self.0.store.lock().await;
        store.get_subscription(id).map_err(store_error)
    }

    async fn claim_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        claimed_at: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<AlertClaim> {
        let store = self.0.store.lock().await;
        store
            .claim_alert(id, expected, claimed_at, stale_before)
            .map_err(store_error)
    }

    async fn release_alert_claim(&self, id: i64, claimed_at: OffsetDateTime) -> Result<()> {
        let store = self.0.store.lock().await;
        store
            .release_alert_claim(id, claimed_at)
            .map_err(store_error)?;
        Ok(())
    }

    async fn compare_and_set_last_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        new: OffsetDateTime,
    ) -> Result<bool> {
        let store = self.0.store.lock().await;
        store
            .compare_and_set_last_alert(id, expected, new)
            .map_err(store_error)
    }

    async fn record_alert(&self, alert: SentAlert) -> Result<()> {
        let store = self.0.store.lock().await;
        store.record_alert(&alert).map_err(store_error)?;
        Ok(())
    }
}

/// Dispatcher wired to the application's store and notifier.
///
/// Each delivery attempt is bounded by the notifier timeout.
pub async fn dispatcher(
    state: &Arc<AppState>,
) -> AlertDispatcher<StoreSubscriptions, Arc<dyn Notifier>> {
    let (retry, timeout) = {
        let config = state.config.read().await;
        (config.alerts.retry_config(), config.notifier.timeout())
    };
    AlertDispatcher::new(
        StoreSubscriptions(Arc::clone(state)),
        Arc::clone(&state.notifier),
    )
    .with_retry_config(retry)
    .with_delivery_timeout(timeout)
}

/// Evaluate `reading` for every active subscription of `city` and update
/// the dispatch counters.
pub async fn dispatch_reading(
    state: &Arc<AppState>,
    city: &str,
    reading: &Reading,
) -> Result<DispatchReport> {
    let dispatcher = dispatcher(state).await;
    match dispatcher
        .dispatch(city, reading, OffsetDateTime::now_utc())
        .await
    {
        Ok(report) => {
            state.stats.record(&report);
            Ok(report)
        }
        Err(e) => {
            warn!("Dispatch for {} failed: {}", city, e);
            state.stats.record_error();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airwatch_core::{DispatchOutcome, MockNotifier, RetryConfig, SuppressReason};
    use airwatch_store::Store;
    use time::Duration;

    use crate::config::Config;

    fn create_test_state(notifier: Arc<MockNotifier>) -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.alerts.delivery_retries = 0;
        AppState::new(store, config, notifier)
    }

    fn reading(aqi: f64) -> Reading {
        Reading::builder()
            .aqi(aqi)
            .timestamp(OffsetDateTime::now_utc())
            .build()
    }

    async fn subscribe(state: &AppState, email: &str, city: &str) -> i64 {
        let store = state.store.lock().await;
        store
            .subscribe(email, city, Some(150.0), Some(24.0))
            .unwrap()
            .subscription
            .id
    }

    #[tokio::test]
    async fn test_dispatcher_uses_configured_retries() {
        let state = create_test_state(Arc::new(MockNotifier::new()));
        let dispatcher = dispatcher(&state).await;
        assert_eq!(dispatcher.retry_config().max_retries, 0);
        assert_eq!(
            *dispatcher.retry_config(),
            RetryConfig::for_delivery().max_retries(0)
        );
        let timeout = state.config.read().await.notifier.timeout();
        assert_eq!(dispatcher.delivery_timeout(), Some(timeout));
    }

    #[tokio::test]
    async fn test_dispatch_commits_to_store() {
        let notifier = Arc::new(MockNotifier::new());
        let state = create_test_state(Arc::clone(&notifier));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;

        let report = dispatch_reading(&state, "delhi", &reading(220.0))
            .await
            .unwrap();
        assert_eq!(report.sent(), 1);
        assert_eq!(notifier.sent_count(), 1);

        let store = state.store.lock().await;
        let sub = store.get_subscription(id).unwrap().unwrap();
        assert!(sub.last_alert_at.is_some());

        let alerts = store.list_alerts(Some("Delhi"), 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subscription_id, id);
        drop(store);

        let stats = state.stats.snapshot();
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_second_dispatch_is_rate_limited() {
        let notifier = Arc::new(MockNotifier::new());
        let state = create_test_state(Arc::clone(&notifier));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;

        dispatch_reading(&state, "Delhi", &reading(220.0))
            .await
            .unwrap();
        let report = dispatch_reading(&state, "Delhi", &reading(260.0))
            .await
            .unwrap();

        assert_eq!(
            report.outcome_for(id),
            Some(&DispatchOutcome::Suppressed {
                reason: SuppressReason::RateLimited
            })
        );
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_clock() {
        let notifier = Arc::new(MockNotifier::new());
        notifier.set_should_fail(true, Some("mailbox full"));
        let state = create_test_state(Arc::clone(&notifier));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;

        let report = dispatch_reading(&state, "Delhi", &reading(220.0))
            .await
            .unwrap();
        assert_eq!(report.failed(), 1);

        let store = state.store.lock().await;
        assert!(store.get_subscription(id).unwrap().unwrap().last_alert_at.is_none());
        assert!(store.list_alerts(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_and_scheduler_race_sends_once() {
        let notifier = Arc::new(MockNotifier::new());
        notifier.set_latency(std::time::Duration::from_millis(20));
        let state = create_test_state(Arc::clone(&notifier));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;

        let r = reading(260.0);
        let (a, b) = tokio::join!(
            dispatch_reading(&state, "Delhi", &r),
            dispatch_reading(&state, "Delhi", &r)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(notifier.sent_count(), 1);
        assert_eq!(a.sent() + b.sent(), 1);
        assert!(
            [a.outcome_for(id), b.outcome_for(id)]
                .contains(&Some(&DispatchOutcome::InFlight))
        );

        let store = state.store.lock().await;
        assert_eq!(store.list_alerts(Some("Delhi"), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_claims() {
        let state = create_test_state(Arc::new(MockNotifier::new()));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;
        let adapter = StoreSubscriptions(Arc::clone(&state));
        let now = OffsetDateTime::now_utc();
        let lease = now - Duration::minutes(10);

        assert_eq!(
            adapter.claim_alert(id, None, now, lease).await.unwrap(),
            AlertClaim::Acquired
        );
        assert_eq!(
            adapter.claim_alert(id, None, now, lease).await.unwrap(),
            AlertClaim::InFlight
        );
        adapter.release_alert_claim(id, now).await.unwrap();
        assert_eq!(
            adapter.claim_alert(id, None, now, lease).await.unwrap(),
            AlertClaim::Acquired
        );
        assert!(matches!(
            adapter.claim_alert(999, None, now, lease).await,
            Err(Error::SubscriptionNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_adapter_reports_lost_compare_and_set() {
        let state = create_test_state(Arc::new(MockNotifier::new()));
        let id = subscribe(&state, "asha@example.com", "Delhi").await;
        let adapter = StoreSubscriptions(Arc::clone(&state));
        let now = OffsetDateTime::now_utc();

        assert!(adapter.compare_and_set_last_alert(id, None, now).await.unwrap());
        assert!(
            !adapter
                .compare_and_set_last_alert(id, None, now + Duration::hours(1))
                .await
                .unwrap()
        );
        assert!(matches!(
            adapter.compare_and_set_last_alert(999, None, now).await,
            Err(Error::SubscriptionNotFound(999))
        ));
    }
}
