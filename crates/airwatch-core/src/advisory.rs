//! Health advisories per category.

use airwatch_types::Category;

/// The recommended-action sentence for a category.
pub fn advisory(category: Category) -> &'static str {
    category.advisory()
}

/// Protective actions to include in alert messages.
///
/// Empty for categories that need no action.
pub fn recommendations(category: Category) -> &'static [&'static str] {
    match category {
        Category::Good => &[],
        Category::Moderate => &["Unusually sensitive people should limit long outdoor exertion"],
        Category::UnhealthyForSensitive => &[
            "Children, older adults and people with lung disease should reduce outdoor exertion",
            "Keep quick-relief medicine at hand if you have asthma",
        ],
        Category::Unhealthy | Category::VeryUnhealthy | Category::Hazardous => &[
            "Avoid prolonged outdoor activities",
            "Keep windows closed",
            "Use air purifiers if available",
            "Wear an N95 mask if you must go outside",
        ],
    }
}
