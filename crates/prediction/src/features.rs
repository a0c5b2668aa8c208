//! Cart feature extraction
//!
//! The one place where missing or malformed line-item fields are defaulted.
//! The request path and the fallback path both go through [`extract`], so
//! they always agree on feature values.

use crate::types::{CartLineItem, OrderFeatures};

/// Base preparation time assumed for an item that does not carry one.
pub const DEFAULT_BASE_PREPARATION_MINUTES: f64 = 5.0;

/// Complexity assumed for an item that does not carry one.
pub const DEFAULT_PREPARATION_COMPLEXITY: u32 = 1;

impl CartLineItem {
    /// Base preparation time with the default applied.
    pub fn effective_base_time(&self) -> f64 {
        self.base_preparation_time_minutes
            .filter(|minutes| minutes.is_finite() && *minutes >= 0.0)
            .unwrap_or(DEFAULT_BASE_PREPARATION_MINUTES)
    }

    /// Complexity with the default applied; never below 1.
    pub fn effective_complexity(&self) -> u32 {
        self.preparation_complexity
            .unwrap_or(DEFAULT_PREPARATION_COMPLEXITY)
            .max(1)
    }

    /// Quantity, never below 1.
    pub fn effective_quantity(&self) -> u32 {
        self.quantity.max(1)
    }
}

/// Aggregates a cart into [`OrderFeatures`]. Never fails; an empty cart
/// yields `{0, 1, 0}`. The base-time total saturates at `f64::MAX`.
pub fn extract(items: &[CartLineItem]) -> OrderFeatures {
    items.iter().fold(
        OrderFeatures {
            total_base_time_minutes: 0.0,
            max_complexity: DEFAULT_PREPARATION_COMPLEXITY,
            total_item_count: 0,
        },
        |acc, item| {
            let quantity = item.effective_quantity();
            OrderFeatures {
                total_base_time_minutes: (acc.total_base_time_minutes
                    + item.effective_base_time() * f64::from(quantity))
                .min(f64::MAX),
                max_complexity: acc.max_complexity.max(item.effective_complexity()),
                total_item_count: acc.total_item_count.saturating_add(quantity),
            }
        },
    )
}
