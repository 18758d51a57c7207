//! SnapshotCache - Latest Image per Camera
//!
//! ## Responsibilities
//!
//! - Hold the most recently delivered image per camera
//! - Reject deliveries older than what is already cached
//! - Wake tasks waiting for a fresh image of a specific camera
//!
//! The lock is held only for a single map read or write, never across
//! a network call or a wait.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

/// Cached image for one camera
#[derive(Debug, Clone)]
pub struct SnapshotCacheEntry {
    pub camera_id: String,
    /// Image bytes as delivered on the bus (JPEG)
    pub data: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

impl SnapshotCacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.captured_at)
    }
}

/// SnapshotCache configuration
#[derive(Debug, Clone)]
pub struct SnapshotCacheConfig {
    /// Maximum number of cameras held in memory
    pub max_cameras: usize,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self { max_cameras: 100 }
    }
}

/// SnapshotCache service
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, SnapshotCacheEntry>>,
    waiters: RwLock<HashMap<String, Arc<Notify>>>,
    config: SnapshotCacheConfig,
}

impl SnapshotCache {
    pub fn new(config: SnapshotCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SnapshotCacheConfig::default())
    }

    /// Store a delivered image if it is newer than the cached one
    ///
    /// Returns false when the delivery was older (or same age) and dropped.
    pub async fn update(
        &self,
        camera_id: &str,
        data: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> bool {
        let size = data.len();
        {
            let mut entries = self.entries.write().await;

            if let Some(existing) = entries.get(camera_id) {
                if captured_at <= existing.captured_at {
                    tracing::debug!(
                        camera_id = %camera_id,
                        cached_at = %existing.captured_at,
                        delivered_at = %captured_at,
                        "Dropped snapshot older than cached image"
                    );
                    return false;
                }
            } else if entries.len() >= self.config.max_cameras {
                Self::evict_oldest(&mut entries);
            }

            entries.insert(
                camera_id.to_string(),
                SnapshotCacheEntry {
                    camera_id: camera_id.to_string(),
                    data: Arc::from(data),
                    captured_at,
                },
            );
        }

        self.notifier(camera_id).await.notify_waiters();

        tracing::trace!(
            camera_id = %camera_id,
            size = size,
            captured_at = %captured_at,
            "Snapshot cached"
        );

        true
    }

    /// Latest cached image regardless of age
    pub async fn get(&self, camera_id: &str) -> Option<SnapshotCacheEntry> {
        self.entries.read().await.get(camera_id).cloned()
    }

    /// Latest cached image if it is no older than `max_age`
    pub async fn get_fresh(
        &self,
        camera_id: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Option<SnapshotCacheEntry> {
        self.get(camera_id)
            .await
            .filter(|entry| entry.age(now) <= max_age)
    }

    /// Wait until an image captured at or after `since` arrives
    ///
    /// Returns None if the wait expires first.
    pub async fn wait_for_newer(
        &self,
        camera_id: &str,
        since: DateTime<Utc>,
        timeout: std::time::Duration,
    ) -> Option<SnapshotCacheEntry> {
        let notify = self.notifier(camera_id).await;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so a delivery in between is not missed
            notified.as_mut().enable();

            if let Some(entry) = self.get(camera_id).await {
                if entry.captured_at >= since {
                    return Some(entry);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            camera_count: entries.len(),
            total_bytes: entries.values().map(|e| e.data.len()).sum(),
        }
    }

    async fn notifier(&self, camera_id: &str) -> Arc<Notify> {
        {
            let waiters = self.waiters.read().await;
            if let Some(notify) = waiters.get(camera_id) {
                return notify.clone();
            }
        }

        let mut waiters = self.waiters.write().await;
        waiters
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn evict_oldest(entries: &mut HashMap<String, SnapshotCacheEntry>) {
        if let Some(oldest_id) = entries
            .values()
            .min_by_key(|e| e.captured_at)
            .map(|e| e.camera_id.clone())
        {
            entries.remove(&oldest_id);
            tracing::debug!(camera_id = %oldest_id, "Evicted oldest snapshot from cache");
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub camera_count: usize,
    pub total_bytes: usize,
}
