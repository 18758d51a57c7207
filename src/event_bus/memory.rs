//! In-process bus
//!
//! Used when no broker is configured and as the bus double in tests.
//! Cameras can be simulated with auto-replies: a snapshot request for a
//! camera with a configured image is answered with that image.
//! Only the most recent publishes are kept for inspection.

use super::{BusMessage, MessageBus, Topics, TopicKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Publishes kept for inspection
pub const PUBLISH_HISTORY: usize = 256;

#[derive(Default)]
struct MemoryState {
    published: VecDeque<BusMessage>,
    auto_replies: HashMap<String, Vec<u8>>,
}

/// In-memory message bus
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Topics,
    inbound: mpsc::Sender<BusMessage>,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryBus {
    /// Create a bus and the inbound stream the listener consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        Self::with_topics(Topics::default(), capacity)
    }

    pub fn with_topics(topics: Topics, capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                topics,
                inbound: tx,
                state: Arc::new(Mutex::new(MemoryState::default())),
            },
            rx,
        )
    }

    /// Answer snapshot requests for `camera_id` with `image`
    pub fn set_auto_reply(&self, camera_id: &str, image: Vec<u8>) {
        self.state().auto_replies.insert(camera_id.to_string(), image);
    }

    /// Deliver a message as if a camera had published it
    pub async fn inject(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.inbound
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .await
            .map_err(|_| Error::Bus("inbound channel closed".to_string()))
    }

    /// Most recent publishes, oldest first
    pub fn published(&self) -> Vec<BusMessage> {
        self.state().published.iter().cloned().collect()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.state()
            .published
            .iter()
            .map(|m| m.topic.clone())
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let reply = {
            let mut state = self.state();
            if state.published.len() >= PUBLISH_HISTORY {
                state.published.pop_front();
            }
            state.published.push_back(BusMessage {
                topic: topic.to_string(),
                payload,
            });

            match self.topics.parse(topic) {
                Some(parsed) if parsed.kind == TopicKind::SnapshotRequest => state
                    .auto_replies
                    .get(&parsed.camera_id)
                    .map(|image| (self.topics.snapshot_image(&parsed.camera_id), image.clone())),
                _ => None,
            }
        };

        if let Some((reply_topic, image)) = reply {
            self.inject(&reply_topic, image).await?;
        }

        Ok(())
    }
}
