//! DispatchQueue - Strict Priority Work Queue
//!
//! ## Responsibilities
//!
//! - Merge motion (HIGH) and periodic (LOW) work items into one queue
//! - Serve every queued HIGH item before any LOW item
//! - Serve items of the same priority in arrival order
//! - Block idle workers until work arrives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// Work item priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Camera-triggered motion
    High,
    /// Self-generated periodic snapshot
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

/// Where a work item's image comes from
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Image already captured by the producer
    Inline {
        data: Arc<[u8]>,
        captured_at: DateTime<Utc>,
        /// Fallback image used after the capture wait expired
        stale: bool,
    },
    /// Resolve from the snapshot cache when a worker picks the item up
    FromCache,
}

/// One unit of "image to be inferred and possibly acted upon"
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub correlation_id: Uuid,
    pub camera_id: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub image: ImageRef,
}

impl WorkItem {
    /// Motion-triggered item; the image is resolved lazily
    pub fn motion(camera_id: &str, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            camera_id: camera_id.to_string(),
            priority: Priority::High,
            enqueued_at,
            image: ImageRef::FromCache,
        }
    }

    /// Periodic item carrying the image the poller obtained
    pub fn periodic(
        camera_id: &str,
        data: Arc<[u8]>,
        captured_at: DateTime<Utc>,
        stale: bool,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            camera_id: camera_id.to_string(),
            priority: Priority::Low,
            enqueued_at,
            image: ImageRef::Inline {
                data,
                captured_at,
                stale,
            },
        }
    }
}

#[derive(Default)]
struct QueueInner {
    high: VecDeque<WorkItem>,
    low: VecDeque<WorkItem>,
}

impl QueueInner {
    fn pop(&mut self) -> Option<WorkItem> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }
}

/// Queue depth and throughput counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub high_pending: usize,
    pub low_pending: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
}

/// Priority dispatch queue shared by producers and workers
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Notify::new(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Enqueue an item and wake one idle worker
    pub fn push(&self, item: WorkItem) {
        tracing::debug!(
            camera_id = %item.camera_id,
            correlation_id = %item.correlation_id,
            priority = item.priority.as_str(),
            "Work item enqueued"
        );
        {
            let mut inner = self.lock();
            match item.priority {
                Priority::High => inner.high.push_back(item),
                Priority::Low => inner.low.push_back(item),
            }
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Take the next item without waiting
    pub fn try_pop(&self) -> Option<WorkItem> {
        let item = self.lock().pop();
        if item.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Take the next item, waiting until one is available
    pub async fn pop(&self) -> WorkItem {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.high.len() + inner.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            high_pending: inner.high.len(),
            low_pending: inner.low.len(),
            total_enqueued: self.enqueued.load(Ordering::Relaxed),
            total_dequeued: self.dequeued.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // Queue contents stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
