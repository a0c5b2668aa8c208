//! Prediction type definitions

use crate::errors::PredictionError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Queue position reported when the position is unknown or not applicable.
pub const UNKNOWN_QUEUE_POSITION: i64 = -1;

// -------------------
// Cart input
// -------------------

/// One line of a cart, as handed over by the cart collaborator.
///
/// Decoding is lenient: the cart JSON held by the frontend mixes camelCase
/// and snake_case keys and carries numbers as strings in places. Fields that
/// cannot be read are left absent and defaulted by the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLineItem", rename_all = "camelCase")]
pub struct CartLineItem {
    pub item_id: String,
    /// Always at least 1.
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_preparation_time_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preparation_complexity: Option<u32>,
}

impl CartLineItem {
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity: quantity.max(1),
            base_preparation_time_minutes: None,
            preparation_complexity: None,
        }
    }

    pub fn with_base_time(mut self, minutes: f64) -> Self {
        self.base_preparation_time_minutes = Some(minutes);
        self
    }

    pub fn with_complexity(mut self, complexity: u32) -> Self {
        self.preparation_complexity = Some(complexity);
        self
    }
}

#[derive(Deserialize)]
struct RawLineItem {
    #[serde(default, alias = "itemId", alias = "id", alias = "menu_item_id")]
    item_id: Option<Value>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(
        default,
        alias = "basePreparationTimeMinutes",
        alias = "base_preparation_time_minutes"
    )]
    base_time: Option<Value>,
    #[serde(
        default,
        alias = "preparationComplexity",
        alias = "preparation_complexity"
    )]
    complexity: Option<Value>,
}

impl From<RawLineItem> for CartLineItem {
    fn from(raw: RawLineItem) -> Self {
        let item_id = match raw.item_id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };

        let quantity = raw
            .quantity
            .as_ref()
            .and_then(lenient_number)
            .filter(|q| *q >= 1.0)
            .map(|q| q.min(u32::MAX as f64) as u32)
            .unwrap_or(1);

        let base_preparation_time_minutes = raw
            .base_time
            .as_ref()
            .and_then(lenient_number)
            .filter(|minutes| *minutes >= 0.0);

        let preparation_complexity = raw
            .complexity
            .as_ref()
            .and_then(lenient_number)
            .map(|c| c.clamp(0.0, u32::MAX as f64) as u32);

        Self {
            item_id,
            quantity,
            base_preparation_time_minutes,
            preparation_complexity,
        }
    }
}

/// Reads a JSON number or a numeric string; anything else is absent.
fn lenient_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

// -------------------
// Derived features
// -------------------

/// Aggregate cart features, recomputed on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderFeatures {
    pub total_base_time_minutes: f64,
    pub max_complexity: u32,
    pub total_item_count: u32,
}

// -------------------
// Prediction output
// -------------------

/// Where a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionMethod {
    #[serde(rename = "model", alias = "ml_model")]
    Model,
    /// Server-side rule-based estimate; the backend reports several flavours.
    #[serde(
        rename = "rule_based_fallback",
        alias = "rule_based_fallback_no_model",
        alias = "ml_model_outlier_fallback",
        alias = "emergency_fallback"
    )]
    RuleBasedFallback,
    #[serde(rename = "client_fallback")]
    ClientFallback,
}

impl PredictionMethod {
    pub fn is_fallback(self) -> bool {
        !matches!(self, PredictionMethod::Model)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionMethod::Model => "model",
            PredictionMethod::RuleBasedFallback => "rule_based_fallback",
            PredictionMethod::ClientFallback => "client_fallback",
        }
    }
}

/// Explainability detail attached to a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBreakdown {
    #[serde(alias = "baseTime", alias = "baseTimeMinutes")]
    pub base_time_minutes: f64,
    #[serde(alias = "queueEffect", alias = "queueEffectMinutes")]
    pub queue_effect_minutes: f64,
    #[serde(alias = "demandFactor", alias = "demandFactorLabel")]
    pub demand_factor_label: String,
}

/// An immutable ready-time prediction, from the backend, the local fallback,
/// or a live update frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(with = "timestamp")]
    pub predicted_ready_time: DateTime<Utc>,
    pub estimated_minutes: f64,
    pub confidence: f64,
    #[serde(default = "unknown_queue_position")]
    pub queue_position: i64,
    /// A backend that omits the method is reporting a model prediction.
    #[serde(default = "model_method")]
    pub method: PredictionMethod,
    #[serde(default)]
    pub rush_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<PredictionBreakdown>,
}

fn unknown_queue_position() -> i64 {
    UNKNOWN_QUEUE_POSITION
}

fn model_method() -> PredictionMethod {
    PredictionMethod::Model
}

impl PredictionResult {
    /// Builds a result whose ready time and minute estimate are derived
    /// together from the same `now`.
    ///
    /// Minutes are clamped to `[0, f64::MAX]`; an overflowing estimate
    /// saturates and its ready time pins to `DateTime::<Utc>::MAX_UTC`.
    pub fn derived(
        now: DateTime<Utc>,
        estimated_minutes: f64,
        confidence: f64,
        queue_position: i64,
        method: PredictionMethod,
    ) -> Self {
        let estimated_minutes = if estimated_minutes.is_nan() {
            0.0
        } else {
            estimated_minutes.clamp(0.0, f64::MAX)
        };
        let offset_ms = (estimated_minutes * 60_000.0).round() as i64;
        let predicted_ready_time = ChronoDuration::try_milliseconds(offset_ms)
            .and_then(|offset| now.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            predicted_ready_time,
            estimated_minutes,
            confidence,
            queue_position,
            method,
            rush_detected: false,
            breakdown: None,
        }
    }

    /// Decodes and validates a backend response body or a stream frame.
    pub fn from_json(payload: &str) -> Result<Self, PredictionError> {
        let result: PredictionResult = serde_json::from_str(payload)?;
        result.validate()?;
        Ok(result)
    }

    pub fn from_value(value: Value) -> Result<Self, PredictionError> {
        let result: PredictionResult = serde_json::from_value(value)?;
        result.validate()?;
        Ok(result)
    }

    /// Rejects values a well-formed backend never produces.
    pub fn validate(&self) -> Result<(), PredictionError> {
        if !self.estimated_minutes.is_finite() || self.estimated_minutes < 0.0 {
            return Err(PredictionError::Transport(format!(
                "malformed payload: estimated_minutes {} out of range",
                self.estimated_minutes
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PredictionError::Transport(format!(
                "malformed payload: confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }

    /// Whole minutes for display; `estimated_minutes` keeps full precision.
    pub fn display_minutes(&self) -> i64 {
        self.estimated_minutes.round() as i64
    }
}

/// Lenient timestamp codec: RFC 3339 out, RFC 3339 or naive ISO-8601 (read
/// as UTC) in.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

// -------------------
// Classification
// -------------------

/// Discrete UI tier for a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Reliable,
    Rough,
    LowConfidence,
    Approximate,
}

impl ConfidenceTier {
    /// Pure function of `(confidence, method)`. Fallback methods always read
    /// as approximate, whatever confidence they carry.
    pub fn classify(confidence: f64, method: PredictionMethod) -> Self {
        if method.is_fallback() {
            ConfidenceTier::Approximate
        } else if confidence >= 0.8 {
            ConfidenceTier::Reliable
        } else if confidence >= 0.6 {
            ConfidenceTier::Rough
        } else {
            ConfidenceTier::LowConfidence
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::Reliable => "reliable",
            ConfidenceTier::Rough => "rough",
            ConfidenceTier::LowConfidence => "low_confidence",
            ConfidenceTier::Approximate => "approximate",
        }
    }

    /// Badge label text.
    pub fn label(self) -> &'static str {
        match self {
            ConfidenceTier::Reliable => "Reliable Prediction",
            ConfidenceTier::Rough => "Rough Estimate",
            ConfidenceTier::LowConfidence => "Low Confidence",
            ConfidenceTier::Approximate => "Approximate",
        }
    }
}

/// A prediction together with its UI tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedPrediction {
    pub result: PredictionResult,
    pub tier: ConfidenceTier,
    /// Error absorbed on the way to a fallback result, kept for diagnostics.
    pub absorbed_error: Option<PredictionError>,
}

impl ClassifiedPrediction {
    pub fn new(result: PredictionResult) -> Self {
        let tier = ConfidenceTier::classify(result.confidence, result.method);
        Self {
            result,
            tier,
            absorbed_error: None,
        }
    }

    pub fn degraded(result: PredictionResult, error: PredictionError) -> Self {
        Self {
            absorbed_error: Some(error),
            ..Self::new(result)
        }
    }

    /// True when the remote call failed and a local estimate stands in.
    pub fn is_degraded(&self) -> bool {
        self.absorbed_error.is_some()
    }
}

/// What `get_prediction` resolves to. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    /// Empty cart or missing vendor; nothing was requested. Distinct from a
    /// zero-minute prediction.
    NoPrediction(PredictionError),
    Ready(ClassifiedPrediction),
}

impl PredictionOutcome {
    pub fn prediction(&self) -> Option<&ClassifiedPrediction> {
        match self {
            PredictionOutcome::Ready(prediction) => Some(prediction),
            PredictionOutcome::NoPrediction(_) => None,
        }
    }

    pub fn into_prediction(self) -> Option<ClassifiedPrediction> {
        match self {
            PredictionOutcome::Ready(prediction) => Some(prediction),
            PredictionOutcome::NoPrediction(_) => None,
        }
    }
}

// -------------------
// Configuration
// -------------------

/// Client-side prediction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PredictionConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Remote prediction endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; `/predict` and `/health` are resolved against it.
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// Retries after a transport failure; at most one is ever made.
    pub max_retries: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            timeout_seconds: 4,
            max_retries: 0,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> std::time::Duration {
        let seconds = if self.timeout_seconds == 0 {
            ApiConfig::default().timeout_seconds
        } else {
            self.timeout_seconds
        };
        std::time::Duration::from_secs(seconds)
    }

    pub fn effective_retries(&self) -> u8 {
        self.max_retries.min(1)
    }
}

/// Live update stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Base URL; feeds live at `<endpoint>/predictions/<vendor_id>`.
    pub endpoint: String,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed reconnects before a feed gives up.
    pub max_reconnect_attempts: u32,
    /// Upper bound on opening one streaming connection.
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:5000".to_string(),
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_reconnect_attempts: 6,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    /// Delay before reconnect `attempt` (1-based): doubles from the initial
    /// backoff, capped at the maximum.
    pub fn connect_timeout(&self) -> std::time::Duration {
        let millis = if self.connect_timeout_ms == 0 {
            StreamConfig::default().connect_timeout_ms
        } else {
            self.connect_timeout_ms
        };
        std::time::Duration::from_millis(millis)
    }

    pub fn max_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_backoff_ms)
    }

    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        std::time::Duration::from_millis(delay)
    }
}
