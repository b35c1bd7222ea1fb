//! Alert message composition.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use airwatch_types::{Category, Reading};

use crate::advisory::{advisory, recommendations};

/// A rendered alert, ready for any [`Notifier`](crate::Notifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// City the alert is about.
    pub city: String,
    /// AQI that triggered the alert.
    pub aqi: f64,
    /// Category of that AQI.
    pub category: Category,
    /// One-line subject.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Timestamp of the triggering reading.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl AlertMessage {
    /// Compose the subject and body for a reading in `city`.
    pub fn compose(city: &str, reading: &Reading, category: Category) -> Self {
        let label = category.label();
        let subject = format!("Air Quality Alert: {} in {}", label.to_uppercase(), city);

        let mut body = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(body, "Air Quality Alert for {city}");
        let _ = writeln!(body);
        let _ = writeln!(body, "Status: {label}");
        let _ = writeln!(body, "Current AQI: {:.0}", reading.aqi);
        let _ = writeln!(body);
        let _ = writeln!(body, "Air Quality Details:");
        let _ = writeln!(body, "- PM2.5: {:.1} µg/m³", reading.pm25);
        let _ = writeln!(body, "- PM10: {:.1} µg/m³", reading.pm10);
        let _ = writeln!(body);
        let _ = writeln!(body, "Health Advisory:");
        let _ = writeln!(body, "{}", advisory(category));

        let actions = recommendations(category);
        if !actions.is_empty() {
            let _ = writeln!(body);
            let _ = writeln!(body, "Recommendations:");
            for action in actions {
                let _ = writeln!(body, "- {action}");
            }
        }

        let _ = writeln!(body);
        let _ = write!(
            body,
            "Observed at {}",
            reading
                .timestamp
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default()
        );

        Self {
            city: city.to_string(),
            aqi: reading.aqi,
            category,
            subject,
            body,
            observed_at: reading.timestamp,
        }
    }
}
