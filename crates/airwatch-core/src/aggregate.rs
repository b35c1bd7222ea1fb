//! Window statistics over a reading time series.
//!
//! [`aggregate`] reduces readings to the peak and trough of a closed window
//! `[start, end]`. A window with no readings yields
//! [`WindowSummary::EmptyWindow`], never a zero AQI.

use time::{Duration, OffsetDateTime};

use airwatch_types::{Reading, ValidationError, ValidationResult, WindowStats, WindowSummary};

/// Aggregate the readings that fall inside `[window_start, window_end]`.
///
/// Input order does not matter. Ties on AQI are resolved to the earliest
/// timestamp for both `max` and `min`.
///
/// # Errors
///
/// - [`ValidationError::InvalidWindow`] if `window_start > window_end`.
/// - [`ValidationError::InvalidReading`] if a reading inside the window is
///   malformed. Readings outside the window are not inspected.
///
/// # Example
///
/// ```
/// use airwatch_core::{Reading, aggregate};
/// use time::{Duration, OffsetDateTime};
///
/// let t0 = OffsetDateTime::UNIX_EPOCH;
/// let readings = [
///     Reading::builder().aqi(50.0).timestamp(t0).build(),
///     Reading::builder().aqi(300.0).timestamp(t0 + Duration::hours(1)).build(),
///     Reading::builder().aqi(10.0).timestamp(t0 + Duration::hours(2)).build(),
/// ];
///
/// let summary = aggregate(&readings, t0, t0 + Duration::hours(2))?;
/// let stats = summary.stats().unwrap();
/// assert_eq!(stats.max.aqi, 300.0);
/// assert_eq!(stats.min.aqi, 10.0);
/// assert_eq!(stats.total_readings, 3);
/// # Ok::<(), airwatch_core::ValidationError>(())
/// ```
pub fn aggregate(
    readings: &[Reading],
    window_start: OffsetDateTime,
    window_end: OffsetDateTime,
) -> ValidationResult<WindowSummary> {
    if window_start > window_end {
        return Err(ValidationError::InvalidWindow {
            start: window_start,
            end: window_end,
        });
    }

    let mut max: Option<&Reading> = None;
    let mut min: Option<&Reading> = None;
    let mut total = 0usize;
    let mut sum = 0.0f64;

    for reading in readings
        .iter()
        .filter(|r| r.timestamp >= window_start && r.timestamp <= window_end)
    {
        reading.validate()?;
        total += 1;
        sum += reading.aqi;

        max = match max {
            Some(current) if !beats(reading, current, |a, b| a > b) => Some(current),
            _ => Some(reading),
        };
        min = match min {
            Some(current) if !beats(reading, current, |a, b| a < b) => Some(current),
            _ => Some(reading),
        };
    }

    let (Some(max), Some(min)) = (max, min) else {
        return Ok(WindowSummary::EmptyWindow);
    };

    Ok(WindowSummary::Stats(WindowStats {
        max: *max,
        min: *min,
        total_readings: total,
        mean_aqi: sum / total as f64,
        window_start,
        window_end,
    }))
}

/// Aggregate the trailing window `[now - span, now]`.
///
/// # Errors
///
/// Same as [`aggregate`]; a negative `span` is an invalid window.
pub fn aggregate_trailing(
    readings: &[Reading],
    now: OffsetDateTime,
    span: Duration,
) -> ValidationResult<WindowSummary> {
    aggregate(readings, now.saturating_sub(span), now)
}

/// Whether `candidate` replaces `current` as the extreme under `better`.
///
/// Equal AQI keeps whichever reading is earlier.
fn beats(candidate: &Reading, current: &Reading, better: impl Fn(f64, f64) -> bool) -> bool {
    if better(candidate.aqi, current.aqi) {
        return true;
    }
    candidate.aqi == current.aqi && candidate.timestamp < current.timestamp
}
