//! The AQI category table.
//!
//! Six contiguous bands cover `[0, ∞)`. Each band is inclusive on its upper
//! bound, so a value sitting exactly on a breakpoint belongs to the lower
//! band. The last band is open-ended.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// AQI severity category.
///
/// Variants are declared in ascending severity, so the derived `Ord`
/// compares by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Category {
    /// AQI 0 to 50.
    Good,
    /// AQI above 50, up to 100.
    Moderate,
    /// AQI above 100, up to 150.
    UnhealthyForSensitive,
    /// AQI above 150, up to 200.
    Unhealthy,
    /// AQI above 200, up to 300.
    VeryUnhealthy,
    /// AQI above 300.
    Hazardous,
}

impl Category {
    /// All categories, lowest severity first.
    pub const ALL: [Category; 6] = [
        Category::Good,
        Category::Moderate,
        Category::UnhealthyForSensitive,
        Category::Unhealthy,
        Category::VeryUnhealthy,
        Category::Hazardous,
    ];

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Category::Good => "Good",
            Category::Moderate => "Moderate",
            Category::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            Category::Unhealthy => "Unhealthy",
            Category::VeryUnhealthy => "Very Unhealthy",
            Category::Hazardous => "Hazardous",
        }
    }

    /// Severity rank, 0 (Good) through 5 (Hazardous).
    #[must_use]
    pub fn severity_rank(&self) -> u8 {
        *self as u8
    }

    /// Color token used by presentation code.
    #[must_use]
    pub fn color_token(&self) -> &'static str {
        match self {
            Category::Good => "green",
            Category::Moderate => "yellow",
            Category::UnhealthyForSensitive => "orange",
            Category::Unhealthy => "red",
            Category::VeryUnhealthy => "purple",
            Category::Hazardous => "maroon",
        }
    }

    /// The health advisory sentence for this category.
    #[must_use]
    pub fn advisory(&self) -> &'static str {
        match self {
            Category::Good => "Air quality is satisfactory. Enjoy outdoor activities!",
            Category::Moderate => {
                "Air quality is acceptable. Unusually sensitive people should consider \
                 limiting prolonged outdoor exertion."
            }
            Category::UnhealthyForSensitive => {
                "Members of sensitive groups may experience health effects. \
                 Reduce prolonged outdoor exertion."
            }
            Category::Unhealthy => {
                "Everyone may begin to experience health effects. \
                 Avoid prolonged outdoor exertion."
            }
            Category::VeryUnhealthy => {
                "Health alert: everyone may experience serious health effects. Stay indoors."
            }
            Category::Hazardous => {
                "Health warnings of emergency conditions. \
                 Everyone should avoid outdoor activities."
            }
        }
    }

    /// Look up a category by severity rank.
    ///
    /// # Examples
    ///
    /// ```
    /// use airwatch_types::Category;
    ///
    /// assert_eq!(Category::from_rank(0), Some(Category::Good));
    /// assert_eq!(Category::from_rank(5), Some(Category::Hazardous));
    /// assert_eq!(Category::from_rank(6), None);
    /// ```
    #[must_use]
    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }

    /// The AQI range covered by this category.
    #[must_use]
    pub fn range(&self) -> AqiRange {
        let index = self.severity_rank() as usize;
        let upper = CATEGORY_TABLE[index].upper;
        if index == 0 {
            AqiRange {
                lower: 0.0,
                lower_inclusive: true,
                upper,
            }
        } else {
            AqiRange {
                // Every band but the last has an upper bound.
                lower: CATEGORY_TABLE[index - 1].upper.unwrap_or(f64::INFINITY),
                lower_inclusive: false,
                upper,
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the category table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryBand {
    /// Category assigned to values inside this band.
    pub category: Category,
    /// Inclusive upper bound; `None` for the open-ended last band.
    pub upper: Option<f64>,
}

/// Ordered AQI breakpoints, lowest first.
pub static CATEGORY_TABLE: [CategoryBand; 6] = [
    CategoryBand {
        category: Category::Good,
        upper: Some(50.0),
    },
    CategoryBand {
        category: Category::Moderate,
        upper: Some(100.0),
    },
    CategoryBand {
        category: Category::UnhealthyForSensitive,
        upper: Some(150.0),
    },
    CategoryBand {
        category: Category::Unhealthy,
        upper: Some(200.0),
    },
    CategoryBand {
        category: Category::VeryUnhealthy,
        upper: Some(300.0),
    },
    CategoryBand {
        category: Category::Hazardous,
        upper: None,
    },
];

/// A range over AQI values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AqiRange {
    /// Lower bound.
    pub lower: f64,
    /// Whether `lower` itself belongs to the range.
    pub lower_inclusive: bool,
    /// Inclusive upper bound, `None` when unbounded.
    pub upper: Option<f64>,
}

impl AqiRange {
    /// Check whether an AQI value falls inside this range.
    #[must_use]
    pub fn contains(&self, aqi: f64) -> bool {
        let above_lower = if self.lower_inclusive {
            aqi >= self.lower
        } else {
            aqi > self.lower
        };
        above_lower && self.upper.is_none_or(|upper| aqi <= upper)
    }
}

impl fmt::Display for AqiRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lower_inclusive { '[' } else { '(' };
        match self.upper {
            Some(upper) => write!(f, "{}{}, {}]", open, self.lower, upper),
            None => write!(f, "{}{}, ∞)", open, self.lower),
        }
    }
}
