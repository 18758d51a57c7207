//! EventBus - Camera Pub/Sub Integration
//!
//! ## Responsibilities
//!
//! - `MessageBus` port for publishing, with MQTT and in-memory adapters
//! - `EventBusListener`: translate inbound messages into cache updates
//!   and queue inserts, nothing else
//! - `SnapshotRequester`: ask a camera for a capture and wait (bounded)
//!   for the image to land in the cache
//!
//! ## Failure policy
//!
//! Malformed topics and empty payloads are dropped and logged. A single
//! bad message never stops the listener loop.

mod memory;
mod mqtt;
mod topics;

pub use memory::InMemoryBus;
pub use mqtt::{MqttBus, MqttConfig};
pub use topics::{CameraTopic, TopicKind, Topics};

use crate::clock::Clock;
use crate::dispatch_queue::{DispatchQueue, WorkItem};
use crate::error::{Error, Result};
use crate::snapshot_cache::{SnapshotCache, SnapshotCacheEntry};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded wait for a requested image
pub const IMAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bus publish acknowledgement timeout
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw inbound bus message
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publishing side of the message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Listener that feeds the snapshot cache and the dispatch queue
pub struct EventBusListener {
    topics: Topics,
    cache: Arc<SnapshotCache>,
    queue: Arc<DispatchQueue>,
    clock: Arc<dyn Clock>,
}

impl EventBusListener {
    pub fn new(
        topics: Topics,
        cache: Arc<SnapshotCache>,
        queue: Arc<DispatchQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            topics,
            cache,
            queue,
            clock,
        }
    }

    /// Handle one inbound message
    pub async fn handle(&self, message: BusMessage) {
        let Some(parsed) = self.topics.parse(&message.topic) else {
            tracing::debug!(topic = %message.topic, "Ignoring message on unknown topic");
            return;
        };

        match parsed.kind {
            TopicKind::Motion => {
                let item = WorkItem::motion(&parsed.camera_id, self.clock.now());
                tracing::info!(
                    camera_id = %parsed.camera_id,
                    correlation_id = %item.correlation_id,
                    "Motion event received"
                );
                self.queue.push(item);
            }
            TopicKind::SnapshotImage => {
                if message.payload.is_empty() {
                    tracing::warn!(
                        camera_id = %parsed.camera_id,
                        "Dropped empty snapshot payload"
                    );
                    return;
                }
                let size = message.payload.len();
                let stored = self
                    .cache
                    .update(&parsed.camera_id, message.payload, self.clock.now())
                    .await;
                tracing::debug!(
                    camera_id = %parsed.camera_id,
                    size = size,
                    stored = stored,
                    "Snapshot image received"
                );
            }
            TopicKind::SnapshotRequest => {
                // Our own requests echoed back by the broker
                tracing::trace!(camera_id = %parsed.camera_id, "Ignoring snapshot request echo");
            }
        }
    }

    /// Start the listener loop (background task)
    pub fn start(
        self: Arc<Self>,
        inbound: mpsc::Receiver<BusMessage>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(inbound, shutdown).await })
    }

    async fn run(&self, mut inbound: mpsc::Receiver<BusMessage>, shutdown: CancellationToken) {
        tracing::info!(prefix = %self.topics.prefix(), "Event bus listener started");

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => message,
            };

            match message {
                Some(message) => self.handle(message).await,
                None => {
                    tracing::warn!("Bus inbound channel closed");
                    break;
                }
            }
        }

        tracing::info!("Event bus listener stopped");
    }
}

/// How an image was obtained for a camera
#[derive(Debug, Clone)]
pub enum ImageResolution {
    /// Captured after the request (or recent enough to reuse)
    Fresh(SnapshotCacheEntry),
    /// Wait expired; the most recent cached image is used instead
    Stale(SnapshotCacheEntry),
    /// Wait expired and nothing is cached for this camera
    Missing,
}

impl ImageResolution {
    pub fn entry(&self) -> Option<&SnapshotCacheEntry> {
        match self {
            ImageResolution::Fresh(e) | ImageResolution::Stale(e) => Some(e),
            ImageResolution::Missing => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ImageResolution::Stale(_))
    }
}

/// Requests captures over the bus and waits for them in the cache
pub struct SnapshotRequester {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    cache: Arc<SnapshotCache>,
    clock: Arc<dyn Clock>,
    wait_timeout: Duration,
    reuse_window: chrono::Duration,
}

impl SnapshotRequester {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topics: Topics,
        cache: Arc<SnapshotCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            topics,
            cache,
            clock,
            wait_timeout: IMAGE_WAIT_TIMEOUT,
            reuse_window: chrono::Duration::seconds(5),
        }
    }

    /// Override the bounded image wait
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Override how old a cached image may be and still count as fresh
    pub fn with_reuse_window(mut self, window: chrono::Duration) -> Self {
        self.reuse_window = window;
        self
    }

    /// Publish a capture request for a camera
    pub async fn request_capture(&self, camera_id: &str) -> Result<()> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "requested_at": self.clock.now().to_rfc3339(),
        }))?;
        let topic = self.topics.snapshot_request(camera_id);

        tokio::time::timeout(PUBLISH_TIMEOUT, self.bus.publish(&topic, payload))
            .await
            .map_err(|_| Error::Timeout(format!("publish to {}", topic)))?
    }

    /// Obtain an image for a camera
    ///
    /// With `reuse_recent`, an image cached within the reuse window is
    /// returned without a new request. Otherwise a capture is requested
    /// and awaited; on timeout the most recent cached image is used.
    pub async fn resolve(&self, camera_id: &str, reuse_recent: bool) -> ImageResolution {
        let requested_at = self.clock.now();

        if reuse_recent {
            if let Some(entry) = self
                .cache
                .get_fresh(camera_id, self.reuse_window, requested_at)
                .await
            {
                return ImageResolution::Fresh(entry);
            }
        }

        match self.request_capture(camera_id).await {
            Ok(()) => {
                if let Some(entry) = self
                    .cache
                    .wait_for_newer(camera_id, requested_at, self.wait_timeout)
                    .await
                {
                    return ImageResolution::Fresh(entry);
                }
                tracing::debug!(
                    camera_id = %camera_id,
                    wait_ms = self.wait_timeout.as_millis() as u64,
                    "Image wait expired"
                );
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %e,
                    "Snapshot request failed, falling back to cached image"
                );
            }
        }

        match self.cache.get(camera_id).await {
            Some(entry) => ImageResolution::Stale(entry),
            None => ImageResolution::Missing,
        }
    }
}
