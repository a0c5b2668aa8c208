//! Structured fallback diagnostics

use crate::errors::{FailureReason, PredictionError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Emitted every time the orchestrator degrades to a local estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub vendor_id: String,
    pub reason: FailureReason,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl FallbackEvent {
    pub fn new(vendor_id: &str, error: &PredictionError) -> Self {
        Self {
            vendor_id: vendor_id.to_string(),
            reason: error.reason(),
            detail: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver for fallback events.
pub trait DiagnosticsSink: Send + Sync {
    fn record_fallback(&self, event: &FallbackEvent);
}

/// Default sink: one structured `warn!` per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record_fallback(&self, event: &FallbackEvent) {
        warn!(
            vendor_id = %event.vendor_id,
            reason = ?event.reason,
            timestamp = %event.timestamp.to_rfc3339(),
            detail = %event.detail,
            "prediction degraded to client fallback"
        );
    }
}

/// Keeps events in memory for callers that surface them.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<FallbackEvent>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FallbackEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn record_fallback(&self, event: &FallbackEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_reason_class() {
        let event = FallbackEvent::new("v1", &PredictionError::Timeout);
        assert_eq!(event.reason, FailureReason::Transport);
        assert_eq!(event.vendor_id, "v1");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "TransportError");
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingDiagnostics::new();
        sink.record_fallback(&FallbackEvent::new("a", &PredictionError::Timeout));
        sink.record_fallback(&FallbackEvent::new(
            "b",
            &PredictionError::Validation("empty".into()),
        ));

        let vendors: Vec<_> = sink.events().into_iter().map(|e| e.vendor_id).collect();
        assert_eq!(vendors, vec!["a", "b"]);
        assert_eq!(sink.events()[1].reason, FailureReason::Validation);
    }
}
