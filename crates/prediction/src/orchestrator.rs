//! Prediction orchestration: remote first, local fallback, UI tier.

use crate::client::{BackendHealth, PredictionBackend, PredictionClient};
use crate::diagnostics::{DiagnosticsSink, FallbackEvent, TracingDiagnostics};
use crate::errors::PredictionError;
use crate::fallback::FallbackEstimator;
use crate::metrics::PredictionMetrics;
use crate::types::{
    ApiConfig, CartLineItem, ClassifiedPrediction, PredictionOutcome, PredictionResult,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Façade callers use to obtain a prediction for a cart.
///
/// Stateless apart from shared metrics: construct once, share behind an
/// `Arc`, never tear down.
pub struct PredictionOrchestrator {
    backend: Arc<dyn PredictionBackend>,
    fallback: FallbackEstimator,
    diagnostics: Arc<dyn DiagnosticsSink>,
    metrics: Arc<PredictionMetrics>,
    max_retries: u8,
    attempt_timeout: Duration,
}

impl PredictionOrchestrator {
    pub fn new(backend: Arc<dyn PredictionBackend>) -> Self {
        Self {
            backend,
            fallback: FallbackEstimator::new(),
            diagnostics: Arc::new(TracingDiagnostics),
            metrics: Arc::new(PredictionMetrics::new()),
            max_retries: 0,
            attempt_timeout: ApiConfig::default().timeout(),
        }
    }

    /// Orchestrator over the HTTP client described by `config`.
    pub fn from_config(config: &ApiConfig) -> Result<Self, PredictionError> {
        let client = PredictionClient::new(config)?;
        Ok(Self::new(Arc::new(client))
            .with_max_retries(config.max_retries)
            .with_attempt_timeout(config.timeout()))
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PredictionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// At most one retry is ever made.
    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.min(1);
        self
    }

    /// Upper bound on a single backend attempt, whatever the backend does.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &Arc<PredictionMetrics> {
        &self.metrics
    }

    /// Resolves to a prediction or the no-prediction sentinel. Never fails:
    /// backend errors come back as a client fallback carrying the absorbed
    /// error.
    pub async fn get_prediction(
        &self,
        items: &[CartLineItem],
        vendor_id: Option<&str>,
    ) -> PredictionOutcome {
        let vendor_id = match vendor_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(vendor_id) => vendor_id,
            None => {
                self.metrics.record_no_prediction();
                return PredictionOutcome::NoPrediction(PredictionError::Validation(
                    "vendor id is missing".to_string(),
                ));
            }
        };
        if items.is_empty() {
            self.metrics.record_no_prediction();
            return PredictionOutcome::NoPrediction(PredictionError::Validation(
                "cart is empty".to_string(),
            ));
        }

        self.metrics.record_request();
        match self.request_remote(vendor_id, items).await {
            Ok(result) => {
                self.metrics.record_remote_result();
                debug!(
                    vendor_id,
                    method = result.method.as_str(),
                    estimated_minutes = result.estimated_minutes,
                    confidence = result.confidence,
                    "prediction received"
                );
                PredictionOutcome::Ready(ClassifiedPrediction::new(result))
            }
            Err(error) => PredictionOutcome::Ready(self.degrade(vendor_id, items, error)),
        }
    }

    pub async fn backend_health(&self) -> Result<BackendHealth, PredictionError> {
        tokio::time::timeout(self.attempt_timeout, self.backend.health()).await?
    }

    async fn request_remote(
        &self,
        vendor_id: &str,
        items: &[CartLineItem],
    ) -> Result<PredictionResult, PredictionError> {
        let mut attempt: u8 = 0;
        loop {
            let outcome = tokio::time::timeout(
                self.attempt_timeout,
                self.backend.request_prediction(vendor_id, items),
            )
            .await
            .unwrap_or(Err(PredictionError::Timeout))
            .and_then(|result| result.validate().map(|_| result));

            match outcome {
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    self.metrics.record_retry();
                    debug!(vendor_id, %error, "retrying prediction request");
                }
                other => return other,
            }
        }
    }

    fn degrade(
        &self,
        vendor_id: &str,
        items: &[CartLineItem],
        error: PredictionError,
    ) -> ClassifiedPrediction {
        self.metrics.record_fallback();
        self.diagnostics
            .record_fallback(&FallbackEvent::new(vendor_id, &error));

        let result = self.fallback.estimate(items);
        info!(
            vendor_id,
            estimated_minutes = result.estimated_minutes,
            "using client fallback estimate"
        );
        ClassifiedPrediction::degraded(result, error)
    }
}

/// Request lifecycle as seen by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
}

/// One logical caller's view: the current prediction plus "latest request
/// wins" bookkeeping.
pub struct PredictionSession {
    orchestrator: Arc<PredictionOrchestrator>,
    inner: Mutex<SessionInner>,
}

#[derive(Default)]
struct SessionInner {
    /// Sequence number of the most recently issued request.
    issued: u64,
    /// Sequence number of the last request that resolved or was cancelled.
    settled: u64,
    vendor_id: Option<String>,
    current: Option<Arc<ClassifiedPrediction>>,
}

impl PredictionSession {
    pub fn new(orchestrator: Arc<PredictionOrchestrator>) -> Self {
        Self {
            orchestrator,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        let inner = self.inner.lock();
        if inner.issued > inner.settled {
            SessionState::Requesting
        } else {
            SessionState::Idle
        }
    }

    pub fn current(&self) -> Option<Arc<ClassifiedPrediction>> {
        self.inner.lock().current.clone()
    }

    /// Requests a prediction and stores it as current, unless a newer
    /// request or a cancel happened meanwhile. Returns `None` for a result
    /// that arrived stale and was discarded.
    pub async fn refresh(
        &self,
        items: &[CartLineItem],
        vendor_id: Option<&str>,
    ) -> Option<PredictionOutcome> {
        let sequence = {
            let mut inner = self.inner.lock();
            inner.issued += 1;
            inner.issued
        };

        let outcome = self.orchestrator.get_prediction(items, vendor_id).await;

        let mut inner = self.inner.lock();
        if inner.issued != sequence {
            self.orchestrator.metrics().record_stale_discard();
            debug!(sequence, latest = inner.issued, "discarding stale prediction");
            return None;
        }

        inner.settled = sequence;
        match &outcome {
            PredictionOutcome::Ready(prediction) => {
                inner.current = Some(Arc::new(prediction.clone()));
                inner.vendor_id = vendor_id.map(|id| id.trim().to_string());
            }
            PredictionOutcome::NoPrediction(_) => {
                inner.current = None;
                inner.vendor_id = None;
            }
        }
        Some(outcome)
    }

    /// Invalidates any in-flight request; its result will be discarded.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.issued += 1;
        inner.settled = inner.issued;
    }

    /// Replaces the displayed prediction with a pushed update for the same
    /// vendor. Returns whether it was applied.
    pub fn apply_update(&self, vendor_id: &str, update: PredictionResult) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.is_none() || inner.vendor_id.as_deref() != Some(vendor_id) {
            return false;
        }
        inner.current = Some(Arc::new(ClassifiedPrediction::new(update)));
        true
    }
}
