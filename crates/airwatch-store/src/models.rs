//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use airwatch_types::{Reading, Subscription};

/// A city stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCity {
    /// Database row ID.
    pub id: i64,
    /// City name (unique, case-insensitive).
    pub name: String,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Inactive cities are hidden from rankings.
    pub active: bool,
    /// When the city was first seen.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// City name.
    pub city: String,
    /// When this reading was captured (second precision).
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub aqi: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub co: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub nh3: f64,
}

impl StoredReading {
    /// Convert to a [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading {
            aqi: self.aqi,
            pm25: self.pm25,
            pm10: self.pm10,
            co: self.co,
            no2: self.no2,
            o3: self.o3,
            so2: self.so2,
            nh3: self.nh3,
            timestamp: self.captured_at,
        }
    }
}

/// A city with its most recent AQI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRanking {
    pub city: String,
    pub country: Option<String>,
    pub aqi: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

/// Result of [`Store::subscribe`](crate::Store::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOutcome {
    /// The subscription as stored.
    pub subscription: Subscription,
    /// `true` if a new row was created, `false` if an existing one was
    /// reactivated or updated.
    pub created: bool,
}
