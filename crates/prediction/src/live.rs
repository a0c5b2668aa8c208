//! Live prediction updates pushed per vendor.
//!
//! One feed (one streaming connection) per vendor id, shared by every
//! subscriber of that vendor. The feed is torn down when its last
//! subscriber detaches. Abnormal closes are retried with capped exponential
//! backoff; a normal close from the server ends the feed.

use crate::config::join_segments;
use crate::errors::PredictionError;
use crate::metrics::PredictionMetrics;
use crate::types::{PredictionResult, StreamConfig};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Callback invoked for every accepted update.
pub type UpdateCallback = Arc<dyn Fn(PredictionResult) + Send + Sync>;

/// Inbound frames a connector yields.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, PredictionError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Text(String),
    /// `normal` is false for any close code other than a normal closure.
    Close { normal: bool },
}

/// Opens the per-vendor streaming connection.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(&self, vendor_id: &str) -> Result<FrameStream, PredictionError>;
}

/// Feed status observable by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Ended by a normal close or by the last unsubscribe.
    Closed,
    /// Reconnect attempts exhausted. Subscribe again to restart the feed.
    Disconnected,
}

impl FeedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeedStatus::Closed | FeedStatus::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Connects to `<endpoint>/predictions/<vendor_id>` over WebSocket.
pub struct WebSocketConnector {
    base: Url,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &StreamConfig) -> Result<Self, PredictionError> {
        let base = Url::parse(config.endpoint.trim())?;
        Ok(Self {
            base,
            connect_timeout: config.connect_timeout(),
        })
    }

    pub fn feed_url(&self, vendor_id: &str) -> Result<Url, PredictionError> {
        join_segments(&self.base, &["predictions", vendor_id])
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, vendor_id: &str) -> Result<FrameStream, PredictionError> {
        let url = self.feed_url(vendor_id)?;
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| PredictionError::Stream(format!("connecting to {url} timed out")))??;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(StreamFrame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(StreamFrame::Close {
                    normal: frame.map_or(true, |frame| frame.code == CloseCode::Normal),
                })),
                Ok(_) => None,
                Err(err) => Some(Err(PredictionError::from(err))),
            }
        });
        Ok(Box::pin(frames))
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Reference-counted, per-vendor live update subscriptions.
#[derive(Clone)]
pub struct LiveUpdateChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    connector: Arc<dyn StreamConnector>,
    config: StreamConfig,
    metrics: Arc<PredictionMetrics>,
    feeds: Mutex<HashMap<String, VendorFeed>>,
    next_subscriber: AtomicU64,
}

type Subscribers = Arc<Mutex<HashMap<u64, UpdateCallback>>>;

struct VendorFeed {
    subscribers: Subscribers,
    status: Arc<watch::Sender<FeedStatus>>,
    task: JoinHandle<()>,
}

impl VendorFeed {
    fn shutdown(self) {
        self.task.abort();
        self.status.send_replace(FeedStatus::Closed);
    }
}

impl LiveUpdateChannel {
    pub fn new(connector: Arc<dyn StreamConnector>, config: StreamConfig) -> Self {
        Self::with_metrics(connector, config, Arc::new(PredictionMetrics::new()))
    }

    pub fn with_metrics(
        connector: Arc<dyn StreamConnector>,
        config: StreamConfig,
        metrics: Arc<PredictionMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                config,
                metrics,
                feeds: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Channel over the WebSocket transport described by `config`.
    pub fn from_config(
        config: &StreamConfig,
        metrics: Arc<PredictionMetrics>,
    ) -> Result<Self, PredictionError> {
        let connector = WebSocketConnector::new(config)?;
        Ok(Self::with_metrics(Arc::new(connector), config.clone(), metrics))
    }

    /// Registers `on_update` for `vendor_id`, opening the vendor's feed if
    /// this is its first subscriber. Must be called inside a Tokio runtime.
    pub fn subscribe<F>(
        &self,
        vendor_id: &str,
        on_update: F,
    ) -> Result<Subscription, PredictionError>
    where
        F: Fn(PredictionResult) + Send + Sync + 'static,
    {
        let vendor_id = vendor_id.trim();
        if vendor_id.is_empty() {
            return Err(PredictionError::Validation("vendor id is empty".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PredictionError::Stream("no Tokio runtime available".to_string()))?;

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let callback: UpdateCallback = Arc::new(on_update);

        let mut feeds = self.inner.feeds.lock();
        let status = match feeds.get_mut(vendor_id) {
            Some(feed) => {
                feed.subscribers.lock().insert(id, callback);
                // A terminal status is published just before the task exits.
                let terminated = feed.status.borrow().is_terminal();
                if terminated || feed.task.is_finished() {
                    debug!(vendor_id, "restarting terminated live feed");
                    feed.task.abort();
                    feed.task = self.inner.spawn_feed(
                        &runtime,
                        vendor_id,
                        feed.subscribers.clone(),
                        feed.status.clone(),
                    );
                }
                feed.status.subscribe()
            }
            None => {
                let subscribers: Subscribers =
                    Arc::new(Mutex::new(HashMap::from([(id, callback)])));
                let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);
                let status_tx = Arc::new(status_tx);
                let task =
                    self.inner
                        .spawn_feed(&runtime, vendor_id, subscribers.clone(), status_tx.clone());
                feeds.insert(
                    vendor_id.to_string(),
                    VendorFeed {
                        subscribers,
                        status: status_tx,
                        task,
                    },
                );
                info!(vendor_id, "opened live feed");
                status_rx
            }
        };

        Ok(Subscription {
            id,
            vendor_id: vendor_id.to_string(),
            channel: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
            status,
        })
    }

    /// Number of vendor feeds connected or trying to connect. Feeds that
    /// ended on a normal close or gave up reconnecting are not counted.
    pub fn connection_count(&self) -> usize {
        self.inner
            .feeds
            .lock()
            .values()
            .filter(|feed| !feed.status.borrow().is_terminal())
            .count()
    }

    pub fn subscriber_count(&self, vendor_id: &str) -> usize {
        self.inner
            .feeds
            .lock()
            .get(vendor_id)
            .map_or(0, |feed| feed.subscribers.lock().len())
    }

    pub fn metrics(&self) -> &Arc<PredictionMetrics> {
        &self.inner.metrics
    }

    /// Closes every feed. Outstanding subscriptions become no-ops.
    pub fn shutdown(&self) {
        let feeds: Vec<VendorFeed> =
            self.inner.feeds.lock().drain().map(|(_, feed)| feed).collect();
        for feed in feeds {
            feed.shutdown();
        }
    }
}

impl ChannelInner {
    fn spawn_feed(
        &self,
        runtime: &tokio::runtime::Handle,
        vendor_id: &str,
        subscribers: Subscribers,
        status: Arc<watch::Sender<FeedStatus>>,
    ) -> JoinHandle<()> {
        runtime.spawn(run_feed(
            self.connector.clone(),
            self.config.clone(),
            self.metrics.clone(),
            vendor_id.to_string(),
            subscribers,
            status,
        ))
    }

    fn detach(&self, vendor_id: &str, id: u64) {
        let mut feeds = self.feeds.lock();
        let now_empty = match feeds.get(vendor_id) {
            Some(feed) => {
                let mut subscribers = feed.subscribers.lock();
                subscribers.remove(&id);
                subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            if let Some(feed) = feeds.remove(vendor_id) {
                feed.shutdown();
                info!(vendor_id, "closed live feed after last unsubscribe");
            }
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        for (_, feed) in self.feeds.get_mut().drain() {
            feed.shutdown();
        }
    }
}

/// Handle returned by [`LiveUpdateChannel::subscribe`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    id: u64,
    vendor_id: String,
    channel: Weak<ChannelInner>,
    active: AtomicBool,
    status: watch::Receiver<FeedStatus>,
}

impl Subscription {
    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Idempotent. Releases the vendor's connection if this was its last
    /// subscriber.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.detach(&self.vendor_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// Feed task
// ---------------------------------------------------------------------------

enum StreamEnd {
    Normal,
    Abnormal(PredictionError),
}

/// Keeps the open-stream gauge honest however the connection ends,
/// including task abort.
struct OpenStream(Arc<PredictionMetrics>);

impl OpenStream {
    fn new(metrics: Arc<PredictionMetrics>) -> Self {
        metrics.stream_opened();
        Self(metrics)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.stream_closed();
    }
}

async fn run_feed(
    connector: Arc<dyn StreamConnector>,
    config: StreamConfig,
    metrics: Arc<PredictionMetrics>,
    vendor_id: String,
    subscribers: Subscribers,
    status: Arc<watch::Sender<FeedStatus>>,
) {
    let mut failures: u32 = 0;
    status.send_replace(FeedStatus::Connecting);

    loop {
        match connector.connect(&vendor_id).await {
            Ok(frames) => {
                let _open = OpenStream::new(metrics.clone());
                status.send_replace(FeedStatus::Connected);
                debug!(vendor_id = %vendor_id, "live feed connected");
                let connected_at = Instant::now();

                let (end, delivered) = pump(frames, &vendor_id, &metrics, &subscribers).await;
                // Only a connection that carried an update or outlived the
                // longest backoff clears the failure count.
                if delivered || connected_at.elapsed() >= config.max_backoff() {
                    failures = 0;
                }

                match end {
                    StreamEnd::Normal => {
                        info!(vendor_id = %vendor_id, "live feed closed by server");
                        status.send_replace(FeedStatus::Closed);
                        return;
                    }
                    StreamEnd::Abnormal(err) => {
                        warn!(vendor_id = %vendor_id, %err, "live feed dropped");
                    }
                }
            }
            Err(err) => {
                warn!(vendor_id = %vendor_id, %err, "live feed connect failed");
            }
        }

        failures += 1;
        if failures > config.max_reconnect_attempts {
            warn!(
                vendor_id = %vendor_id,
                attempts = config.max_reconnect_attempts,
                "live feed giving up after reconnect attempts"
            );
            status.send_replace(FeedStatus::Disconnected);
            return;
        }

        metrics.record_reconnect_attempt();
        status.send_replace(FeedStatus::Reconnecting { attempt: failures });
        tokio::time::sleep(config.backoff(failures)).await;
    }
}

/// Delivers frames until the stream ends. The flag reports whether any
/// update reached subscribers.
async fn pump(
    mut frames: FrameStream,
    vendor_id: &str,
    metrics: &PredictionMetrics,
    subscribers: &Subscribers,
) -> (StreamEnd, bool) {
    let mut delivered = false;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(StreamFrame::Text(text)) => match PredictionResult::from_json(&text) {
                Ok(update) => {
                    metrics.record_frame(true);
                    delivered = true;
                    let callbacks: Vec<UpdateCallback> =
                        subscribers.lock().values().cloned().collect();
                    for callback in callbacks {
                        callback(update.clone());
                    }
                }
                Err(err) => {
                    metrics.record_frame(false);
                    warn!(vendor_id, %err, "dropping malformed prediction frame");
                }
            },
            Ok(StreamFrame::Close { normal: true }) => return (StreamEnd::Normal, delivered),
            Ok(StreamFrame::Close { normal: false }) => {
                let err =
                    PredictionError::Stream("server closed the stream abnormally".to_string());
                return (StreamEnd::Abnormal(err), delivered);
            }
            Err(err) => return (StreamEnd::Abnormal(err), delivered),
        }
    }
    let err = PredictionError::Stream("stream ended without a close frame".to_string());
    (StreamEnd::Abnormal(err), delivered)
}
