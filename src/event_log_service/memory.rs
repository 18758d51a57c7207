//! In-memory ring buffer of recent outcomes

use super::{EventLogSink, EventRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 2000;

struct EventRingBuffer {
    events: VecDeque<EventRecord>,
    capacity: usize,
    total_written: u64,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    fn push(&mut self, record: EventRecord) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(record);
        self.total_written += 1;
    }

    fn get_latest(&self, count: usize) -> Vec<EventRecord> {
        self.events.iter().rev().take(count).cloned().collect()
    }

    fn find(&self, correlation_id: Uuid) -> Option<EventRecord> {
        self.events
            .iter()
            .rev()
            .find(|e| e.correlation_id == correlation_id)
            .cloned()
    }

    fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<EventRecord> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }
}

/// Ring buffer sink (newest first on read)
pub struct MemoryEventLog {
    buffer: RwLock<EventRingBuffer>,
}

impl MemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(EventRingBuffer::new(capacity)),
        }
    }

    /// Latest records, newest first
    pub async fn get_latest(&self, count: usize) -> Vec<EventRecord> {
        self.buffer.read().await.get_latest(count)
    }

    /// Latest records for one camera, newest first
    pub async fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<EventRecord> {
        self.buffer.read().await.get_by_camera(camera_id, count)
    }

    /// Latest record for a correlation id, if still held
    pub async fn find(&self, correlation_id: Uuid) -> Option<EventRecord> {
        self.buffer.read().await.find(correlation_id)
    }

    /// Records currently held
    pub async fn count(&self) -> usize {
        self.buffer.read().await.events.len()
    }

    /// Records ever written, including evicted ones
    pub async fn total_written(&self) -> u64 {
        self.buffer.read().await.total_written
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventLogSink for MemoryEventLog {
    async fn write(&self, record: &EventRecord) -> Result<()> {
        self.buffer.write().await.push(record.clone());
        tracing::trace!(correlation_id = %record.correlation_id, "Event mirrored to ring buffer");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
