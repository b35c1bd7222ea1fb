//! AQI sub-index from PM2.5 concentration (US EPA breakpoints).
//!
//! Used when a reading arrives with pollutant concentrations but without a
//! pre-computed AQI.

use airwatch_types::{ValidationError, ValidationResult};

/// AQI reported for concentrations above the last breakpoint.
pub const PM25_AQI_CEILING: f64 = 500.0;

/// `(conc_low, conc_high, aqi_low, aqi_high)` rows, lowest first.
const PM25_BREAKPOINTS: [(f64, f64, f64, f64); 7] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 350.4, 301.0, 400.0),
    (350.5, 500.4, 401.0, 500.0),
];

/// Compute the AQI for a PM2.5 concentration in µg/m³.
///
/// Interpolates linearly inside the matching breakpoint row. Each row is
/// selected with `<=` on its upper concentration, so values that fall in
/// the gap between two published rows (for example 12.05) use the upper row.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidReading`] for negative or non-finite input.
///
/// # Example
///
/// ```
/// use airwatch_core::aqi_from_pm25;
///
/// assert_eq!(aqi_from_pm25(12.0)?, 50.0);
/// assert_eq!(aqi_from_pm25(6.0)?, 25.0);
/// assert!((aqi_from_pm25(35.4)? - 100.0).abs() < 1e-9);
/// assert_eq!(aqi_from_pm25(900.0)?, 500.0);
/// # Ok::<(), airwatch_core::ValidationError>(())
/// ```
pub fn aqi_from_pm25(pm25: f64) -> ValidationResult<f64> {
    if !pm25.is_finite() || pm25 < 0.0 {
        return Err(ValidationError::InvalidReading(format!(
            "pm25 must be a non-negative number, got {}",
            pm25
        )));
    }

    for &(conc_lo, conc_hi, aqi_lo, aqi_hi) in PM25_BREAKPOINTS.iter() {
        if pm25 <= conc_hi {
            return Ok(linear_scale(pm25, conc_lo, conc_hi, aqi_lo, aqi_hi));
        }
    }

    Ok(PM25_AQI_CEILING)
}

fn linear_scale(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
