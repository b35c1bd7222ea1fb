//! AQI classification.
//!
//! Maps a numeric AQI onto one of the six categories of the shared
//! [`CATEGORY_TABLE`]. Every render site, API handler and alert message goes
//! through [`classify`], so there is exactly one copy of the breakpoints.
//!
//! # Example
//!
//! ```
//! use airwatch_core::{Category, classify};
//!
//! let category = classify(42.0)?;
//! assert_eq!(category, Category::Good);
//! assert_eq!(category.color_token(), "green");
//!
//! // Values on a breakpoint belong to the lower band.
//! assert_eq!(classify(100.0)?, Category::Moderate);
//! # Ok::<(), airwatch_core::ValidationError>(())
//! ```

use serde::{Deserialize, Serialize};

use airwatch_types::{CATEGORY_TABLE, Category, ValidationError, ValidationResult};

/// Classify an AQI value.
///
/// Bands are tested from lowest to highest with `<=` on each upper bound.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidReading`] for negative or non-finite input.
pub fn classify(aqi: f64) -> ValidationResult<Category> {
    validate_aqi(aqi)?;

    for band in CATEGORY_TABLE.iter() {
        match band.upper {
            Some(upper) if aqi <= upper => return Ok(band.category),
            Some(_) => continue,
            None => return Ok(band.category),
        }
    }

    // The last band is open-ended.
    Ok(Category::Hazardous)
}

/// Check whether an AQI lies strictly above the upper bound of `category`.
///
/// Always `false` for [`Category::Hazardous`], which has no upper bound.
pub fn exceeds_category(aqi: f64, category: Category) -> bool {
    category.range().upper.is_some_and(|upper| aqi > upper)
}

fn validate_aqi(aqi: f64) -> ValidationResult<()> {
    if !aqi.is_finite() {
        return Err(ValidationError::InvalidReading(format!(
            "aqi must be finite, got {}",
            aqi
        )));
    }
    if aqi < 0.0 {
        return Err(ValidationError::InvalidReading(format!(
            "aqi must be non-negative, got {}",
            aqi
        )));
    }
    Ok(())
}

/// Display metadata for a classified AQI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// The classified value.
    pub aqi: f64,
    /// Category variant.
    pub category: Category,
    /// Human-readable label.
    pub label: String,
    /// Severity rank (0-5).
    pub severity_rank: u8,
    /// Color token for rendering.
    pub color_token: String,
    /// Health advisory sentence.
    pub advisory: String,
}

impl Classification {
    /// Classify `aqi` and collect its display metadata.
    ///
    /// # Errors
    ///
    /// Same as [`classify`].
    pub fn of(aqi: f64) -> ValidationResult<Self> {
        let category = classify(aqi)?;
        Ok(Self::from_category(aqi, category))
    }

    fn from_category(aqi: f64, category: Category) -> Self {
        Self {
            aqi,
            category,
            label: category.label().to_string(),
            severity_rank: category.severity_rank(),
            color_token: category.color_token().to_string(),
            advisory: crate::advisory::advisory(category).to_string(),
        }
    }
}
