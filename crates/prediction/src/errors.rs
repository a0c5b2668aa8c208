//! Prediction error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while producing or streaming a prediction.
///
/// `Transport` and `Timeout` together form the transport class: anything that
/// went wrong between us and the backend, including a response we could not
/// trust. The orchestrator absorbs both and degrades to a local estimate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout")]
    Timeout,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Coarse failure class reported to the diagnostics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "TransportError")]
    Transport,
    #[serde(rename = "StreamError")]
    Stream,
}

impl PredictionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            PredictionError::Validation(_) | PredictionError::Config(_) => {
                FailureReason::Validation
            }
            PredictionError::Transport(_) | PredictionError::Timeout | PredictionError::Io(_) => {
                FailureReason::Transport
            }
            PredictionError::Stream(_) => FailureReason::Stream,
        }
    }

    /// Whether a second attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.reason(), FailureReason::Transport)
    }
}

impl From<serde_json::Error> for PredictionError {
    fn from(err: serde_json::Error) -> Self {
        PredictionError::Transport(format!("malformed payload: {err}"))
    }
}

impl From<reqwest::Error> for PredictionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PredictionError::Timeout
        } else {
            PredictionError::Transport(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for PredictionError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PredictionError::Timeout
    }
}

impl From<url::ParseError> for PredictionError {
    fn from(err: url::ParseError) -> Self {
        PredictionError::Config(format!("invalid endpoint: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PredictionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PredictionError::Stream(err.to_string())
    }
}
