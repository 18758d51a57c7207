//! PollingOrchestrator - Periodic Snapshot Coverage
//!
//! ## Responsibilities
//!
//! - Once per poll interval, request a capture from every covered camera
//! - Wait (bounded) for each image, falling back to the cached one
//! - Enqueue LOW-priority work items for whatever image is available
//!
//! ## Cycle
//!
//! IDLE -> (inside active hours AND a covered camera is enabled)
//!      -> request/wait/enqueue per camera -> sleep(poll interval) -> IDLE
//!
//! Outside active hours nothing is requested or enqueued. Settings are
//! read once at the start of every cycle.

use crate::clock::Clock;
use crate::dispatch_queue::{DispatchQueue, WorkItem};
use crate::event_bus::SnapshotRequester;
use crate::settings_sync::{SettingsHandle, SettingsSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Why a cycle did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleSkip {
    OutsideActiveHours,
    NoEnabledCameras,
}

/// Per-cycle counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStats {
    pub started_at: DateTime<Utc>,
    pub settings_version: u64,
    pub skipped: Option<CycleSkip>,
    pub requested: usize,
    pub enqueued: usize,
    /// Enqueued with the cached image after the wait expired
    pub stale: usize,
    /// No image at all; nothing enqueued
    pub missing: usize,
}

impl CycleStats {
    fn new(started_at: DateTime<Utc>, settings_version: u64) -> Self {
        Self {
            started_at,
            settings_version,
            skipped: None,
            requested: 0,
            enqueued: 0,
            stale: 0,
            missing: 0,
        }
    }
}

/// PollingOrchestrator instance
pub struct PollingOrchestrator {
    requester: Arc<SnapshotRequester>,
    queue: Arc<DispatchQueue>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    /// Cameras given periodic coverage; empty means "every enabled camera"
    periodic_cameras: Vec<String>,
    last_cycle: RwLock<Option<CycleStats>>,
    cycles_run: AtomicU64,
}

impl PollingOrchestrator {
    pub fn new(
        requester: Arc<SnapshotRequester>,
        queue: Arc<DispatchQueue>,
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
        periodic_cameras: Vec<String>,
    ) -> Self {
        Self {
            requester,
            queue,
            settings,
            clock,
            periodic_cameras,
            last_cycle: RwLock::new(None),
            cycles_run: AtomicU64::new(0),
        }
    }

    /// Stats of the most recent cycle
    pub async fn last_cycle(&self) -> Option<CycleStats> {
        self.last_cycle.read().await.clone()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    fn covered_cameras(&self, settings: &SettingsSnapshot) -> Vec<String> {
        if self.periodic_cameras.is_empty() {
            settings.enabled_cameras.iter().cloned().collect()
        } else {
            self.periodic_cameras.clone()
        }
    }

    /// Run one polling cycle
    pub async fn run_cycle(&self) -> CycleStats {
        let settings = self.settings.load();
        let now = self.clock.now();
        let mut stats = CycleStats::new(now, settings.version);

        let cameras = self.covered_cameras(&settings);

        if !settings.is_active_at(now) {
            stats.skipped = Some(CycleSkip::OutsideActiveHours);
        } else if !cameras.iter().any(|c| settings.is_camera_enabled(c)) {
            stats.skipped = Some(CycleSkip::NoEnabledCameras);
        } else {
            for camera_id in &cameras {
                self.poll_camera(camera_id, &mut stats).await;
            }
        }

        match stats.skipped {
            Some(reason) => tracing::debug!(reason = ?reason, "Polling cycle skipped"),
            None => tracing::info!(
                requested = stats.requested,
                enqueued = stats.enqueued,
                stale = stats.stale,
                missing = stats.missing,
                "Polling cycle finished"
            ),
        }

        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle.write().await = Some(stats.clone());
        stats
    }

    async fn poll_camera(&self, camera_id: &str, stats: &mut CycleStats) {
        stats.requested += 1;

        let resolution = self.requester.resolve(camera_id, false).await;
        let stale = resolution.is_stale();
        let Some(entry) = resolution.entry() else {
            stats.missing += 1;
            tracing::warn!(camera_id = %camera_id, "No image for periodic poll, skipping camera");
            return;
        };

        if stale {
            stats.stale += 1;
        }
        let item = WorkItem::periodic(
            camera_id,
            entry.data.clone(),
            entry.captured_at,
            stale,
            self.clock.now(),
        );
        self.queue.push(item);
        stats.enqueued += 1;
    }

    /// Start polling loop (background task)
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                periodic_cameras = ?self.periodic_cameras,
                "Starting polling orchestrator"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.run_cycle() => {}
                }

                let interval = self.settings.load().poll_interval;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            tracing::info!("Polling orchestrator stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch_queue::{ImageRef, Priority};
    use crate::event_bus::{EventBusListener, InMemoryBus, Topics};
    use crate::settings_sync::ActiveHours;
    use crate::snapshot_cache::SnapshotCache;
    use chrono::TimeZone;
    use std::time::Duration;

    struct Harness {
        bus: InMemoryBus,
        cache: Arc<SnapshotCache>,
        queue: Arc<DispatchQueue>,
        settings: SettingsHandle,
        clock: Arc<ManualClock>,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
            ));
            let cache = Arc::new(SnapshotCache::with_defaults());
            let queue = Arc::new(DispatchQueue::new());
            let (bus, inbound) = InMemoryBus::channel(64);
            let shutdown = CancellationToken::new();

            let listener =
                EventBusListener::new(Topics::default(), cache.clone(), queue.clone(), clock.clone());
            Arc::new(listener).start(inbound, shutdown.clone());

            let mut snapshot = SettingsSnapshot::defaults(chrono_tz::UTC);
            snapshot.enabled_cameras.insert("side".to_string());

            Self {
                bus,
                cache,
                queue,
                settings: SettingsHandle::new(snapshot),
                clock,
                shutdown,
            }
        }

        fn poller(&self, periodic: &[&str]) -> Arc<PollingOrchestrator> {
            let requester = SnapshotRequester::new(
                Arc::new(self.bus.clone()),
                Topics::default(),
                self.cache.clone(),
                self.clock.clone(),
            );
            Arc::new(PollingOrchestrator::new(
                Arc::new(requester),
                self.queue.clone(),
                self.settings.clone(),
                self.clock.clone(),
                periodic.iter().map(|c| c.to_string()).collect(),
            ))
        }

        fn update(&self, f: impl FnOnce(&mut SettingsSnapshot)) {
            let mut next = (*self.settings.load()).clone();
            next.version += 1;
            f(&mut next);
            self.settings.publish(next);
        }
    }

    #[tokio::test]
    async fn test_cycle_enqueues_low_priority_with_fresh_image() {
        let h = Harness::new();
        h.bus.set_auto_reply("side", vec![9, 9]);

        let stats = h.poller(&[]).run_cycle().await;
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.stale, 0);

        let item = h.queue.try_pop().unwrap();
        assert_eq!(item.priority, Priority::Low);
        match item.image {
            ImageRef::Inline { data, stale, .. } => {
                assert_eq!(&data[..], &[9, 9]);
                assert!(!stale);
            }
            ImageRef::FromCache => panic!("periodic items carry their image"),
        }
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_outside_active_hours_publishes_nothing() {
        let h = Harness::new();
        h.update(|s| s.active_hours = ActiveHours::new(20, 6).unwrap());

        let stats = h.poller(&["side", "front"]).run_cycle().await;
        assert_eq!(stats.skipped, Some(CycleSkip::OutsideActiveHours));
        assert_eq!(stats.requested, 0);
        assert!(h.bus.published().is_empty());
        assert!(h.queue.is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_no_enabled_cameras_skips_cycle() {
        let h = Harness::new();
        h.update(|s| s.enabled_cameras.clear());

        let stats = h.poller(&[]).run_cycle().await;
        assert_eq!(stats.skipped, Some(CycleSkip::NoEnabledCameras));
        assert!(h.bus.published().is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_and_missing_image() {
        let h = Harness::new();
        h.cache.update("side", vec![1], h.clock.now()).await;
        h.clock.advance(chrono::Duration::seconds(120));

        let stats = h.poller(&["side", "front"]).run_cycle().await;
        assert_eq!(stats.requested, 2);
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.missing, 1);
        assert_eq!(
            h.bus.published_topics(),
            vec!["camera/side/snapshot/request", "camera/front/snapshot/request"]
        );
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_follows_poll_interval() {
        let h = Harness::new();
        h.update(|s| s.active_hours = ActiveHours::new(20, 6).unwrap());
        let poller = h.poller(&[]);
        let task = poller.clone().start(h.shutdown.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(poller.cycles_run(), 3);

        h.update(|s| s.poll_interval = Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(45)).await;
        // 180 runs with the old interval, then every 10s
        assert_eq!(poller.cycles_run(), 5);

        h.shutdown.cancel();
        task.await.unwrap();
    }
}
