//! Local ready-time estimate used when the remote model is unavailable.

use crate::features;
use crate::types::{
    CartLineItem, PredictionBreakdown, PredictionMethod, PredictionResult, UNKNOWN_QUEUE_POSITION,
};
use chrono::{DateTime, Utc};

/// Multiplier applied to the cart's base time; the estimate must not
/// undershoot the kitchen.
pub const SAFETY_MARGIN: f64 = 1.5;

/// Breakdown label attached to client fallback estimates.
pub const SAFETY_MARGIN_LABEL: &str = "safety_margin";

/// Deterministic, conservative estimator. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEstimator;

impl FallbackEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn estimate(&self, items: &[CartLineItem]) -> PredictionResult {
        self.estimate_at(items, Utc::now())
    }

    /// Same as [`estimate`](Self::estimate) against a fixed clock.
    pub fn estimate_at(&self, items: &[CartLineItem], now: DateTime<Utc>) -> PredictionResult {
        let features = features::extract(items);
        let estimated_minutes = features.total_base_time_minutes * SAFETY_MARGIN;

        let mut result = PredictionResult::derived(
            now,
            estimated_minutes,
            0.0,
            UNKNOWN_QUEUE_POSITION,
            PredictionMethod::ClientFallback,
        );
        result.breakdown = Some(PredictionBreakdown {
            base_time_minutes: features.total_base_time_minutes,
            queue_effect_minutes: 0.0,
            demand_factor_label: SAFETY_MARGIN_LABEL.to_string(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_base_time_by_safety_margin() {
        let items = vec![CartLineItem::new("A", 2).with_base_time(5.0).with_complexity(1)];
        let result = FallbackEstimator::new().estimate(&items);

        assert_eq!(result.estimated_minutes, 15.0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.queue_position, -1);
        assert_eq!(result.method, PredictionMethod::ClientFallback);
        assert!(!result.rush_detected);
    }

    #[test]
    fn ready_time_is_derived_from_the_same_clock() {
        let now = Utc::now();
        let items = vec![CartLineItem::new("A", 1).with_base_time(4.0)];
        let result = FallbackEstimator::new().estimate_at(&items, now);

        assert_eq!(result.estimated_minutes, 6.0);
        assert_eq!((result.predicted_ready_time - now).num_seconds(), 360);
    }

    #[test]
    fn defaults_apply_to_bare_items() {
        let items = vec![CartLineItem::new("A", 1), CartLineItem::new("B", 2)];
        let result = FallbackEstimator::new().estimate(&items);
        assert_eq!(result.estimated_minutes, 22.5);

        let breakdown = result.breakdown.expect("fallback carries a breakdown");
        assert_eq!(breakdown.base_time_minutes, 15.0);
        assert_eq!(breakdown.queue_effect_minutes, 0.0);
        assert_eq!(breakdown.demand_factor_label, SAFETY_MARGIN_LABEL);
    }

    #[test]
    fn overflowing_cart_never_reads_as_ready_now() {
        let items: Vec<CartLineItem> = serde_json::from_str(
            r#"[{"itemId": "A", "quantity": 2, "basePreparationTimeMinutes": 1e308}]"#,
        )
        .unwrap();
        let now = Utc::now();
        let result = FallbackEstimator::new().estimate_at(&items, now);

        assert_eq!(result.estimated_minutes, f64::MAX);
        assert_eq!(result.predicted_ready_time, DateTime::<Utc>::MAX_UTC);
        assert!(result.predicted_ready_time > now);
        assert_eq!(result.breakdown.map(|b| b.base_time_minutes), Some(f64::MAX));
    }

    #[test]
    fn empty_cart_estimates_zero_minutes() {
        let now = Utc::now();
        let result = FallbackEstimator::new().estimate_at(&[], now);
        assert_eq!(result.estimated_minutes, 0.0);
        assert_eq!(result.predicted_ready_time, now);
    }
}
