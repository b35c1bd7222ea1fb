//! Background alert scheduler.
//!
//! Every `alerts.check_interval_secs` the scheduler re-evaluates the latest
//! reading of each city that has active subscriptions. Rate limiting keeps
//! repeated passes over the same reading from re-sending alerts; a pass
//! mainly retries deliveries and conflicts left over from earlier runs.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::alerts::dispatch_reading;
use crate::state::AppState;

/// Background scheduler that periodically dispatches alerts.
pub struct Scheduler {
    state: Arc<AppState>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Spawn the scheduler loop.
    ///
    /// Returns immediately; evaluation happens in the background until
    /// [`SchedulerState::signal_stop`](crate::state::SchedulerState::signal_stop)
    /// is called.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(&self.state);
        state.scheduler.reset_stop();
        state.scheduler.set_running(true);
        tokio::spawn(async move {
            run(state).await;
        })
    }
}

async fn run(state: Arc<AppState>) {
    let period = state.config.read().await.alerts.check_interval();
    info!("Starting alert scheduler (interval: {}s)", period.as_secs());

    let mut stop_rx = state.scheduler.subscribe_stop();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        match run_once(&state).await {
            Ok(summary) => {
                consecutive_failures = 0;
                debug!(
                    "Scheduler pass: {} cities, {} dispatched, {} stale, {} without readings, {} failed",
                    summary.cities,
                    summary.dispatched,
                    summary.stale,
                    summary.no_reading,
                    summary.failed
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    warn!(
                        "Scheduler pass failed: {} (attempt {})",
                        e, consecutive_failures
                    );
                } else if consecutive_failures == 4 {
                    error!(
                        "Scheduler pass failed {} times in a row, will keep trying silently",
                        consecutive_failures
                    );
                }
            }
        }
        state.scheduler.mark_run();
    }

    state.scheduler.set_running(false);
    info!("Alert scheduler stopped");
}

/// Counters for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Cities with active subscriptions.
    pub cities: usize,
    /// Cities whose latest reading was dispatched.
    pub dispatched: usize,
    /// Cities skipped because their latest reading was too old.
    pub stale: usize,
    /// Cities with no reading at all.
    pub no_reading: usize,
    /// Cities whose dispatch aborted.
    pub failed: usize,
}

/// Run a single evaluation pass over every subscribed city.
///
/// A failing city does not stop the pass; only failing to list cities does.
pub async fn run_once(state: &Arc<AppState>) -> Result<PassSummary, SchedulerError> {
    let max_age = state.config.read().await.alerts.max_reading_age();
    let cities = {
        let store = state.store.lock().await;
        store.cities_with_active_subscriptions()?
    };

    let mut summary = PassSummary {
        cities: cities.len(),
        ..PassSummary::default()
    };
    let now = OffsetDateTime::now_utc();

    for city in cities {
        let latest = {
            let store = state.store.lock().await;
            store.latest_reading(&city)
        };
        let latest = match latest {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                summary.no_reading += 1;
                continue;
            }
            Err(e) => {
                warn!("Failed to load latest reading for {}: {}", city, e);
                summary.failed += 1;
                continue;
            }
        };

        if let Some(max_age) = max_age
            && now - latest.captured_at > max_age
        {
            debug!(
                "Skipping {}: latest reading from {} is older than {}",
                city, latest.captured_at, max_age
            );
            summary.stale += 1;
            continue;
        }

        match dispatch_reading(state, &city, &latest.to_reading()).await {
            Ok(_) => summary.dispatched += 1,
            Err(_) => summary.failed += 1,
        }
    }

    Ok(summary)
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to list subscribed cities: {0}")]
    Store(#[from] airwatch_store::Error),
}
