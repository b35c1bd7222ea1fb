//! Core types for air quality readings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ValidationError, ValidationResult};

/// A single air quality observation for one city.
///
/// Readings are immutable once produced; the engine only ever borrows them.
/// Pollutant concentrations are in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Air Quality Index.
    pub aqi: f64,
    /// Fine particulate matter (PM2.5).
    pub pm25: f64,
    /// Coarse particulate matter (PM10).
    pub pm10: f64,
    /// Carbon monoxide.
    pub co: f64,
    /// Nitrogen dioxide.
    pub no2: f64,
    /// Ozone.
    pub o3: f64,
    /// Sulphur dioxide.
    pub so2: f64,
    /// Ammonia.
    pub nh3: f64,
    /// When the reading was observed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            aqi: 0.0,
            pm25: 0.0,
            pm10: 0.0,
            co: 0.0,
            no2: 0.0,
            o3: 0.0,
            so2: 0.0,
            nh3: 0.0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl Reading {
    /// Create a builder for constructing a reading.
    pub fn builder() -> ReadingBuilder {
        ReadingBuilder::default()
    }

    /// Check that the AQI and every concentration are finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidReading`] naming the first bad field.
    pub fn validate(&self) -> ValidationResult<()> {
        check_measurement("aqi", self.aqi)?;
        check_measurement("pm25", self.pm25)?;
        check_measurement("pm10", self.pm10)?;
        check_measurement("co", self.co)?;
        check_measurement("no2", self.no2)?;
        check_measurement("o3", self.o3)?;
        check_measurement("so2", self.so2)?;
        check_measurement("nh3", self.nh3)
    }
}

/// Reject negative and non-finite measurements.
pub(crate) fn check_measurement(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidReading(format!(
            "{} must be finite, got {}",
            field, value
        )));
    }
    if value < 0.0 {
        return Err(ValidationError::InvalidReading(format!(
            "{} must be non-negative, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Builder for [`Reading`].
///
/// Use [`build`](Self::build) for unchecked construction, or
/// [`try_build`](Self::try_build) to validate the measurements.
#[derive(Debug, Default)]
#[must_use]
pub struct ReadingBuilder {
    reading: Reading,
}

impl ReadingBuilder {
    /// Set the AQI.
    pub fn aqi(mut self, aqi: f64) -> Self {
        self.reading.aqi = aqi;
        self
    }

    /// Set PM2.5.
    pub fn pm25(mut self, pm25: f64) -> Self {
        self.reading.pm25 = pm25;
        self
    }

    /// Set PM10.
    pub fn pm10(mut self, pm10: f64) -> Self {
        self.reading.pm10 = pm10;
        self
    }

    /// Set carbon monoxide.
    pub fn co(mut self, co: f64) -> Self {
        self.reading.co = co;
        self
    }

    /// Set nitrogen dioxide.
    pub fn no2(mut self, no2: f64) -> Self {
        self.reading.no2 = no2;
        self
    }

    /// Set ozone.
    pub fn o3(mut self, o3: f64) -> Self {
        self.reading.o3 = o3;
        self
    }

    /// Set sulphur dioxide.
    pub fn so2(mut self, so2: f64) -> Self {
        self.reading.so2 = so2;
        self
    }

    /// Set ammonia.
    pub fn nh3(mut self, nh3: f64) -> Self {
        self.reading.nh3 = nh3;
        self
    }

    /// Set the observation time.
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.reading.timestamp = timestamp;
        self
    }

    /// Build the `Reading` without validation.
    #[must_use]
    pub fn build(self) -> Reading {
        self.reading
    }

    /// Build the `Reading` with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidReading`] if any measurement is
    /// negative or not finite.
    pub fn try_build(self) -> ValidationResult<Reading> {
        self.reading.validate()?;
        Ok(self.reading)
    }
}

/// Peak and trough of the readings inside one window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WindowStats {
    /// Reading with the highest AQI (earliest wins on ties).
    pub max: Reading,
    /// Reading with the lowest AQI (earliest wins on ties).
    pub min: Reading,
    /// Number of readings inside the window.
    pub total_readings: usize,
    /// Mean AQI over the window.
    pub mean_aqi: f64,
    /// Inclusive window start.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub window_start: OffsetDateTime,
    /// Inclusive window end.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub window_end: OffsetDateTime,
}

/// Result of aggregating a window.
///
/// An empty window is a normal outcome meaning "no data"; it must never be
/// rendered as an AQI of zero.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum WindowSummary {
    /// At least one reading fell inside the window.
    #[cfg_attr(feature = "serde", serde(rename = "ok"))]
    Stats(WindowStats),
    /// No readings fell inside the window.
    #[cfg_attr(feature = "serde", serde(rename = "empty"))]
    EmptyWindow,
}

impl WindowSummary {
    /// Whether the window held no readings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, WindowSummary::EmptyWindow)
    }

    /// Borrow the statistics, if any.
    #[must_use]
    pub fn stats(&self) -> Option<&WindowStats> {
        match self {
            WindowSummary::Stats(stats) => Some(stats),
            WindowSummary::EmptyWindow => None,
        }
    }

    /// Take the statistics, if any.
    #[must_use]
    pub fn into_stats(self) -> Option<WindowStats> {
        match self {
            WindowSummary::Stats(stats) => Some(stats),
            WindowSummary::EmptyWindow => None,
        }
    }
}
