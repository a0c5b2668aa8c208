//! Prediction metrics collection

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters shared by the orchestrator, sessions and the live channel.
#[derive(Debug)]
pub struct PredictionMetrics {
    // Request path
    requests: AtomicU64,
    remote_results: AtomicU64,
    fallbacks: AtomicU64,
    retries: AtomicU64,
    no_prediction: AtomicU64,
    stale_discarded: AtomicU64,

    // Live updates
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    reconnect_attempts: AtomicU64,
    open_streams: AtomicUsize,

    start_time: SystemTime,
}

impl Default for PredictionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            remote_results: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            no_prediction: AtomicU64::new(0),
            stale_discarded: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            open_streams: AtomicUsize::new(0),
            start_time: SystemTime::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_result(&self) {
        self.remote_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_prediction(&self) {
        self.no_prediction.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, accepted: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_opened(&self) {
        self.open_streams.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stream_closed(&self) {
        // Never wraps below zero even if a close is reported twice.
        let _ = self
            .open_streams
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                open.checked_sub(1)
            });
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let fallbacks = self.fallbacks.load(Ordering::Relaxed);
        let fallback_rate = if requests > 0 {
            fallbacks as f64 / requests as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().unwrap_or_default().as_secs(),
            requests,
            remote_results: self.remote_results.load(Ordering::Relaxed),
            fallbacks,
            fallback_rate,
            retries: self.retries.load(Ordering::Relaxed),
            no_prediction: self.no_prediction.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            open_streams: self.open_streams(),
        }
    }
}

/// Metrics snapshot for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub requests: u64,
    pub remote_results: u64,
    pub fallbacks: u64,
    pub fallback_rate: f64,
    pub retries: u64,
    pub no_prediction: u64,
    pub stale_discarded: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub reconnect_attempts: u64,
    pub open_streams: usize,
}
