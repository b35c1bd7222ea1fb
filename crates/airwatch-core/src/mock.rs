//! In-memory store and notifier for testing.
//!
//! [`MemorySubscriptionStore`] implements [`SubscriptionStore`] with the
//! same compare-and-set rules as the SQLite store, and [`MockNotifier`]
//! records what it was asked to deliver.
//!
//! # Features
//!
//! - **Conflict injection**: make the next claims lose, or simulate another
//!   writer committing just before them
//! - **Store failure injection**: fail the commit of chosen subscriptions
//! - **Failure injection**: fail every delivery, or only the next few
//! - **Latency simulation**: delay each delivery attempt

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use airwatch_types::{AlertClaim, SentAlert, Subscription};

use crate::error::{Error, Result};
use crate::message::AlertMessage;
use crate::traits::{Notifier, SubscriptionStore};

/// A subscription store held entirely in memory.
///
/// # Example
///
/// ```
/// use airwatch_core::SubscriptionStore;
/// use airwatch_core::mock::MemorySubscriptionStore;
/// use airwatch_types::Subscription;
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemorySubscriptionStore::new();
///     let id = store.insert(Subscription::new("a@example.com", "Lahore")).await;
///
///     let subs = store.active_subscriptions("Lahore").await.unwrap();
///     assert_eq!(subs[0].id, id);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<BTreeMap<i64, Subscription>>,
    alerts: RwLock<Vec<SentAlert>>,
    claims: RwLock<BTreeMap<i64, OffsetDateTime>>,
    next_id: AtomicI64,
    /// Number of upcoming claims that lose without writing.
    forced_conflicts: AtomicU32,
    /// Writes applied right before the next claim on that id.
    concurrent_writes: RwLock<VecDeque<(i64, OffsetDateTime)>>,
    /// Subscriptions whose compare-and-set fails with a store error.
    failing_commits: RwLock<BTreeSet<i64>>,
    cas_calls: AtomicU32,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, assigning it a fresh id.
    pub async fn insert(&self, mut subscription: Subscription) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        subscription.id = id;
        self.subscriptions.write().await.insert(id, subscription);
        id
    }

    /// Deactivate a subscription.
    pub async fn deactivate(&self, id: i64) -> bool {
        match self.subscriptions.write().await.get_mut(&id) {
            Some(sub) => {
                sub.active = false;
                true
            }
            None => false,
        }
    }

    /// Make the next `count` claims report [`AlertClaim::Changed`] without
    /// writing.
    pub fn inject_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::Relaxed);
    }

    /// Simulate another evaluator committing `at` for `id` immediately
    /// before the next claim on that subscription.
    pub async fn inject_concurrent_write(&self, id: i64, at: OffsetDateTime) {
        self.concurrent_writes.write().await.push_back((id, at));
    }

    /// Make every compare-and-set on `id` fail with a store error.
    pub async fn fail_commits_for(&self, id: i64) {
        self.failing_commits.write().await.insert(id);
    }

    /// Whether a claim is currently held on `id`.
    pub async fn is_claimed(&self, id: i64) -> bool {
        self.claims.read().await.contains_key(&id)
    }

    /// Logged alerts, oldest first.
    pub async fn alerts(&self) -> Vec<SentAlert> {
        self.alerts.read().await.clone()
    }

    /// Number of compare-and-set calls made so far.
    pub fn cas_calls(&self) -> u32 {
        self.cas_calls.load(Ordering::Relaxed)
    }

    async fn take_concurrent_write(&self, id: i64) -> Option<OffsetDateTime> {
        let mut pending = self.concurrent_writes.write().await;
        let index = pending.iter().position(|(target, _)| *target == id)?;
        pending.remove(index).map(|(_, at)| at)
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn active_subscriptions(&self, city: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.active && s.city.eq_ignore_ascii_case(city))
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn claim_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        claimed_at: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<AlertClaim> {
        let interference = self.take_concurrent_write(id).await;

        let mut subs = self.subscriptions.write().await;
        let sub = subs.get_mut(&id).ok_or(Error::SubscriptionNotFound(id))?;

        if let Some(at) = interference {
            sub.last_alert_at = Some(at);
        }

        if self.forced_conflicts.load(Ordering::Relaxed) > 0 {
            self.forced_conflicts.fetch_sub(1, Ordering::Relaxed);
            return Ok(AlertClaim::Changed);
        }
        if sub.last_alert_at != expected {
            return Ok(AlertClaim::Changed);
        }

        let mut claims = self.claims.write().await;
        if claims.get(&id).is_some_and(|held| *held >= stale_before) {
            return Ok(AlertClaim::InFlight);
        }
        claims.insert(id, claimed_at);
        Ok(AlertClaim::Acquired)
    }

    async fn release_alert_claim(&self, id: i64, claimed_at: OffsetDateTime) -> Result<()> {
        let mut claims = self.claims.write().await;
        if claims.get(&id) == Some(&claimed_at) {
            claims.remove(&id);
        }
        Ok(())
    }

    async fn compare_and_set_last_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        new: OffsetDateTime,
    ) -> Result<bool> {
        self.cas_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_commits.read().await.contains(&id) {
            return Err(Error::store(std::io::Error::other("database is locked")));
        }

        let mut subs = self.subscriptions.write().await;
        let sub = subs.get_mut(&id).ok_or(Error::SubscriptionNotFound(id))?;

        if sub.last_alert_at != expected {
            return Ok(false);
        }
        if sub.last_alert_at.is_some_and(|current| new < current) {
            return Ok(false);
        }

        sub.last_alert_at = Some(new);
        self.claims.write().await.remove(&id);
        Ok(true)
    }

    async fn record_alert(&self, mut alert: SentAlert) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        alert.id = alerts.len() as i64 + 1;
        alerts.push(alert);
        Ok(())
    }
}

/// A notifier that records messages instead of sending them.
pub struct MockNotifier {
    sent: RwLock<Vec<(AlertMessage, String)>>,
    attempts: AtomicU32,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    remaining_failures: AtomicU32,
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNotifier")
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            attempts: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock delivery failure".to_string()),
            remaining_failures: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Fail every delivery until reset.
    pub fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message
            && let Ok(mut guard) = self.fail_message.try_write()
        {
            *guard = msg.to_string();
        }
    }

    /// Fail only the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Delay each delivery attempt.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delivery attempts, successful or not.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Successful deliveries.
    pub fn sent_count(&self) -> usize {
        self.sent.try_read().map(|s| s.len()).unwrap_or(0)
    }

    /// Delivered messages with their recipient address.
    pub async fn sent_messages(&self) -> Vec<(AlertMessage, String)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::delivery(self.fail_message.read().await.clone()));
        }
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::delivery(self.fail_message.read().await.clone()));
        }

        self.sent
            .write()
            .await
            .push((message.clone(), subscription.email.clone()));
        Ok(())
    }
}
