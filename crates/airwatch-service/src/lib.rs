//! Alert scheduler and HTTP REST API for air quality subscriptions.
//!
//! This crate provides a service that:
//! - Ingests air quality readings per city and classifies them
//! - Keeps email subscriptions with a per-subscriber threshold and re-alert interval
//! - Dispatches rate-limited alerts when a reading crosses a threshold
//! - Re-evaluates subscribed cities on a schedule
//! - Exposes a REST API for readings, window statistics and subscriptions
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Scheduler state and dispatch counters
//! - `GET /api/aqi/classify?aqi=` - Classify an AQI value
//! - `GET /api/aqi/categories` - The category table
//! - `GET /api/cities` - All known cities
//! - `GET /api/cities/top?limit=` - Cities ranked by latest AQI
//! - `PUT /api/cities/{city}` - Show or hide a city in the rankings
//! - `POST /api/cities/{city}/readings` - Ingest a reading and dispatch alerts
//! - `GET /api/cities/{city}/readings?hours=` - Readings over a trailing window
//! - `GET /api/cities/{city}/current` - Latest reading with classification
//! - `GET /api/cities/{city}/stats?hours=` - Peak, trough and mean AQI
//! - `GET /api/cities/{city}/alerts?limit=` - Sent-alert log
//! - `POST /api/subscriptions` - Subscribe (or reactivate)
//! - `GET /api/subscriptions?email=` - Active subscriptions of an address
//! - `POST /api/subscriptions/unsubscribe` - Unsubscribe
//! - `PUT /api/subscriptions/{id}` - Change threshold or interval
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/airwatch/server.toml`
//! (`--init-config` writes the effective one there):
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/airwatch/data.db"
//!
//! [alerts]
//! default_threshold = 150.0
//! default_min_interval_hours = 24.0
//! check_interval_secs = 300
//! max_reading_age_minutes = 180
//! delivery_retries = 3
//!
//! [notifier]
//! kind = "webhook"
//! webhook_url = "https://hooks.example.com/air-quality"
//! timeout_secs = 10
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod notify;
pub mod scheduler;
pub mod state;

pub use alerts::{StoreSubscriptions, dispatch_reading};
pub use config::{
    AlertsConfig, Config, ConfigError, NotifierConfig, NotifierKind, ServerConfig, StorageConfig,
    default_config_path,
};
pub use notify::{LogNotifier, WebhookNotifier, build_notifier};
pub use scheduler::{PassSummary, Scheduler, run_once};
pub use state::{AppState, DispatchStats, DispatchStatsSnapshot, SchedulerState};
