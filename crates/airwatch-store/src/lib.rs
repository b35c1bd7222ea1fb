//! SQLite persistence for the air quality service.
//!
//! This crate stores cities, readings, alert subscriptions and the log of
//! delivered alerts. It is the only place that writes `last_alert_at`, and
//! it does so through [`Store::compare_and_set_last_alert`], which refuses
//! both stale and backwards updates. Delivery is guarded by a claim taken
//! with [`Store::claim_alert`] so that one evaluator sends each alert.
//!
//! # Features
//!
//! - Cities created implicitly on first reading
//! - Readings queried by city and time range, with pagination
//! - Top cities ranked by their latest AQI
//! - Subscribe, unsubscribe and re-subscribe per (email, city)
//! - Alert claims with a lease, released on failed delivery
//! - Compare-and-set of the last-alert instant
//! - Sent-alert log
//!
//! # Example
//!
//! ```no_run
//! use airwatch_store::{ReadingQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! let query = ReadingQuery::new().city("Lahore").limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), airwatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{CityRanking, StoredCity, StoredReading, SubscribeOutcome};
pub use queries::ReadingQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/airwatch/data.db`
/// - macOS: `~/Library/Application Support/airwatch/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\airwatch\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("airwatch")
        .join("data.db")
}
