//! Application state shared across handlers and the scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};

use airwatch_core::{DispatchReport, Notifier};
use airwatch_store::Store;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Where fired alerts are delivered.
    pub notifier: Arc<dyn Notifier>,
    /// Scheduler control state.
    pub scheduler: SchedulerState,
    /// Running totals over every dispatch since startup.
    pub stats: DispatchStats,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            config: RwLock::new(config),
            notifier,
            scheduler: SchedulerState::new(),
            stats: DispatchStats::default(),
        })
    }
}

/// State for tracking and controlling the alert scheduler.
pub struct SchedulerState {
    running: AtomicBool,
    /// When the scheduler was started (Unix timestamp, 0 = never).
    started_at: AtomicU64,
    /// When the last pass finished (Unix timestamp, 0 = never).
    last_run_at: AtomicU64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl SchedulerState {
    /// Create a new scheduler state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            last_run_at: AtomicU64::new(0),
            stop_tx,
            stop_rx,
        }
    }

    /// Check if the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the scheduler as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            self.started_at.store(unix_now(), Ordering::SeqCst);
        }
    }

    /// When the scheduler was started.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        from_unix(self.started_at.load(Ordering::SeqCst))
    }

    /// Record the end of a scheduler pass.
    pub fn mark_run(&self) {
        self.last_run_at.store(unix_now(), Ordering::SeqCst);
    }

    /// When the last scheduler pass finished.
    pub fn last_run_at(&self) -> Option<OffsetDateTime> {
        from_unix(self.last_run_at.load(Ordering::SeqCst))
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the scheduler to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reset the stop signal (for restarting).
    pub fn reset_stop(&self) {
        let _ = self.stop_tx.send(false);
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}

fn from_unix(ts: u64) -> Option<OffsetDateTime> {
    if ts == 0 {
        None
    } else {
        OffsetDateTime::from_unix_timestamp(ts as i64).ok()
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatches: AtomicU64,
    sent: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
}

impl DispatchStats {
    /// Fold a finished dispatch into the counters.
    pub fn record(&self, report: &DispatchReport) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.sent.fetch_add(report.sent() as u64, Ordering::Relaxed);
        self.suppressed
            .fetch_add(report.suppressed() as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed() as u64, Ordering::Relaxed);
    }

    /// Count a dispatch that aborted with an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    /// Dispatch runs that completed.
    pub dispatches: u64,
    /// Alerts delivered and committed.
    pub sent: u64,
    /// Subscriptions evaluated without firing.
    pub suppressed: u64,
    /// Deliveries or commits left for a later run.
    pub failed: u64,
    /// Dispatch runs that aborted.
    pub errors: u64,
}
