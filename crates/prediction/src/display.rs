//! Presentation contract for prediction consumers (badges, pickup windows).

use crate::types::{ClassifiedPrediction, ConfidenceTier};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grace period after the ready time during which pickup is expected.
pub const DEFAULT_PICKUP_GRACE_MINUTES: i64 = 10;

/// Everything a prediction badge shows, already formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBadge {
    /// Ready time as `HH:MM` in the caller's time zone.
    pub ready_by: String,
    pub minutes: i64,
    pub tier: ConfidenceTier,
    pub label: String,
    /// `#n in queue`, only for a known position ahead of zero.
    pub queue_label: Option<String>,
    pub confidence_percent: u8,
    pub low_confidence_warning: bool,
    pub rush_hour: bool,
}

impl PredictionBadge {
    pub fn new<Tz>(prediction: &ClassifiedPrediction, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let result = &prediction.result;
        let confidence = if result.confidence.is_finite() {
            result.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            ready_by: result
                .predicted_ready_time
                .with_timezone(tz)
                .format("%H:%M")
                .to_string(),
            minutes: result.display_minutes(),
            tier: prediction.tier,
            label: prediction.tier.label().to_string(),
            queue_label: (result.queue_position > 0)
                .then(|| format!("#{} in queue", result.queue_position)),
            confidence_percent: (confidence * 100.0).round() as u8,
            low_confidence_warning: confidence < 0.6,
            rush_hour: result.rush_detected,
        }
    }
}

impl fmt::Display for PredictionBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ready by {} ({} min)", self.ready_by, self.minutes)?;
        if let Some(queue) = &self.queue_label {
            write!(f, " · {queue}")?;
        }
        write!(f, " · {} ({}%)", self.label, self.confidence_percent)?;
        if self.rush_hour {
            write!(f, " · RUSH HOUR")?;
        }
        Ok(())
    }
}

/// Window in which the order should be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PickupWindow {
    /// Starts at the full-precision ready time.
    pub fn from_prediction(prediction: &ClassifiedPrediction, grace_minutes: i64) -> Self {
        let start = prediction.result.predicted_ready_time;
        let end = ChronoDuration::try_minutes(grace_minutes.max(0))
            .and_then(|grace| start.checked_add_signed(grace))
            .unwrap_or(start);
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}
