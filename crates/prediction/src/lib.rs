//! Order ready-time prediction
//!
//! Turns a cart and a vendor into an estimated ready time, queue position,
//! confidence tier and rush-hour flag:
//! - Feature extraction from carts with missing or malformed fields
//! - Remote model requests with a bounded timeout and at most one retry
//! - Conservative local fallback when the model cannot be reached
//! - Stable UI tiers derived from confidence and method
//! - Per-vendor live updates with reference-counted connections

pub mod client;
pub mod config;
pub mod diagnostics;
pub mod display;
pub mod errors;
pub mod fallback;
pub mod features;
pub mod live;
pub mod metrics;
pub mod orchestrator;
pub mod types;

pub use client::{BackendHealth, PredictionBackend, PredictionClient, PredictionRequest};
pub use config::{ConfigManager, Environment};
pub use diagnostics::{DiagnosticsSink, FallbackEvent, RecordingDiagnostics, TracingDiagnostics};
pub use display::{PickupWindow, PredictionBadge};
pub use errors::{FailureReason, PredictionError};
pub use fallback::FallbackEstimator;
pub use live::{
    FeedStatus, FrameStream, LiveUpdateChannel, StreamConnector, StreamFrame, Subscription,
    WebSocketConnector,
};
pub use metrics::{MetricsSnapshot, PredictionMetrics};
pub use orchestrator::{PredictionOrchestrator, PredictionSession, SessionState};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
