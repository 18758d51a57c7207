//! WorkerPool - Work Item Processing
//!
//! ## Responsibilities
//!
//! - Run N worker loops that block on the dispatch queue
//! - Per item: resolve image -> detect -> actuate -> save snapshot -> log
//! - Write exactly one event record per item, whatever happened
//!
//! Settings are loaded once per item, so an item is evaluated against a
//! single consistent snapshot.

use crate::actuation::{ActuationController, ActuationDecision, DecisionReason};
use crate::clock::Clock;
use crate::detection::{DetectionDispatcher, DispatchOutcome};
use crate::dispatch_queue::{DispatchQueue, ImageRef, WorkItem};
use crate::event_bus::{ImageResolution, SnapshotRequester};
use crate::event_log_service::{EventLogSink, EventRecord};
use crate::settings_sync::SettingsHandle;
use crate::snapshot_store::{SnapshotMeta, SnapshotStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default number of worker loops
pub const DEFAULT_WORKER_COUNT: usize = 3;

struct ResolvedImage {
    data: Arc<[u8]>,
    captured_at: DateTime<Utc>,
    stale: bool,
}

/// Worker pool shared state
pub struct WorkerPool {
    queue: Arc<DispatchQueue>,
    requester: Arc<SnapshotRequester>,
    dispatcher: Arc<DetectionDispatcher>,
    actuation: Arc<ActuationController>,
    settings: SettingsHandle,
    event_log: Arc<dyn EventLogSink>,
    clock: Arc<dyn Clock>,
    snapshot_store: Option<Arc<SnapshotStore>>,
    worker_count: usize,
    processed: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<DispatchQueue>,
        requester: Arc<SnapshotRequester>,
        dispatcher: Arc<DetectionDispatcher>,
        actuation: Arc<ActuationController>,
        settings: SettingsHandle,
        event_log: Arc<dyn EventLogSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            requester,
            dispatcher,
            actuation,
            settings,
            event_log,
            clock,
            snapshot_store: None,
            worker_count: DEFAULT_WORKER_COUNT,
            processed: AtomicU64::new(0),
        }
    }

    pub fn with_snapshot_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Items processed since start
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Process one work item to completion and record its outcome
    pub async fn process(&self, item: WorkItem) -> EventRecord {
        let settings = self.settings.load();
        let enabled = settings.is_camera_enabled(&item.camera_id);

        let image = match &item.image {
            ImageRef::Inline {
                data,
                captured_at,
                stale,
            } => Some(ResolvedImage {
                data: data.clone(),
                captured_at: *captured_at,
                stale: *stale,
            }),
            // No capture request for a camera that will not be evaluated
            ImageRef::FromCache if !enabled => None,
            ImageRef::FromCache => match self.requester.resolve(&item.camera_id, true).await {
                ImageResolution::Fresh(entry) => Some(ResolvedImage {
                    data: entry.data,
                    captured_at: entry.captured_at,
                    stale: false,
                }),
                ImageResolution::Stale(entry) => Some(ResolvedImage {
                    data: entry.data,
                    captured_at: entry.captured_at,
                    stale: true,
                }),
                ImageResolution::Missing => None,
            },
        };

        let mut record = EventRecord {
            correlation_id: item.correlation_id,
            camera_id: item.camera_id.clone(),
            priority: item.priority,
            enqueued_at: item.enqueued_at,
            processed_at: self.clock.now(),
            image_captured_at: image.as_ref().map(|i| i.captured_at),
            image_stale: image.as_ref().map(|i| i.stale).unwrap_or(false),
            detected: false,
            confidence: None,
            boxes: Vec::new(),
            model_id: None,
            decision: ActuationDecision::not_fired(
                if enabled {
                    DecisionReason::NoImage
                } else {
                    DecisionReason::SkippedDisabledCamera
                },
                self.clock.now(),
            ),
            snapshot_path: None,
            failure: None,
        };

        if let Some(image) = &image {
            match self
                .dispatcher
                .dispatch(&item.camera_id, &image.data, &settings)
                .await
            {
                DispatchOutcome::SkippedDisabledCamera => {
                    record.decision = ActuationDecision::not_fired(
                        DecisionReason::SkippedDisabledCamera,
                        self.clock.now(),
                    );
                }
                DispatchOutcome::InferenceFailed(reason) => {
                    record.decision = ActuationDecision::not_fired(
                        DecisionReason::InferenceFailed,
                        self.clock.now(),
                    );
                    record.failure = Some(reason);
                }
                DispatchOutcome::Evaluated(result) => {
                    record.decision = self
                        .actuation
                        .decide(&item.camera_id, &result, &settings)
                        .await;
                    record.detected = result.detected;
                    record.confidence = Some(result.confidence);
                    record.boxes = result.boxes;
                    record.model_id = Some(result.model_id);
                }
            }

            record.snapshot_path = self.save_snapshot(&item, image, record.detected).await;
        }

        record.processed_at = self.clock.now();

        tracing::info!(
            camera_id = %record.camera_id,
            correlation_id = %record.correlation_id,
            priority = record.priority.as_str(),
            detected = record.detected,
            confidence = ?record.confidence,
            fired = record.decision.fired,
            reason = %record.decision.reason,
            "Work item processed"
        );

        if let Err(e) = self.event_log.write(&record).await {
            tracing::error!(
                correlation_id = %record.correlation_id,
                sink = self.event_log.name(),
                error = %e,
                "Failed to write event record"
            );
        }

        self.processed.fetch_add(1, Ordering::Relaxed);
        record
    }

    async fn save_snapshot(
        &self,
        item: &WorkItem,
        image: &ResolvedImage,
        detected: bool,
    ) -> Option<String> {
        let store = self.snapshot_store.as_ref()?;
        let meta = SnapshotMeta {
            camera_id: item.camera_id.clone(),
            correlation_id: item.correlation_id,
            priority: item.priority,
            detected,
            captured_at: image.captured_at,
        };

        match store.save(&meta, &image.data).await {
            Ok(path) => Some(path.to_string_lossy().to_string()),
            Err(e) => {
                tracing::warn!(
                    camera_id = %item.camera_id,
                    correlation_id = %item.correlation_id,
                    error = %e,
                    "Failed to save snapshot"
                );
                None
            }
        }
    }

    /// Start N worker loops (background tasks)
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        tracing::info!(workers = self.worker_count, "Starting worker pool");

        (0..self.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let item = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            item = pool.queue.pop() => item,
                        };
                        tracing::trace!(worker_id, correlation_id = %item.correlation_id, "Worker picked item");
                        pool.process(item).await;
                    }
                    tracing::debug!(worker_id, "Worker stopped");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::tests::RecordingActuator;
    use crate::actuation::{CooldownGate, FireCommand};
    use crate::clock::ManualClock;
    use crate::detection::tests::{animal, Scripted, ScriptedInference};
    use crate::dispatch_queue::Priority;
    use crate::event_bus::{InMemoryBus, Topics};
    use crate::event_log_service::MemoryEventLog;
    use crate::settings_sync::SettingsSnapshot;
    use crate::snapshot_cache::SnapshotCache;
    use chrono::TimeZone;
    use std::time::Duration;

    struct Harness {
        bus: InMemoryBus,
        cache: Arc<SnapshotCache>,
        queue: Arc<DispatchQueue>,
        clock: Arc<ManualClock>,
        inference: Arc<ScriptedInference>,
        actuator: Arc<RecordingActuator>,
        log: Arc<MemoryEventLog>,
        pool: Arc<WorkerPool>,
    }

    fn harness(script: Vec<Scripted>) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ));
        let cache = Arc::new(SnapshotCache::with_defaults());
        let queue = Arc::new(DispatchQueue::new());
        let (bus, _inbound) = InMemoryBus::channel(16);
        let requester = Arc::new(SnapshotRequester::new(
            Arc::new(bus.clone()),
            Topics::default(),
            cache.clone(),
            clock.clone(),
        ));
        let inference = Arc::new(ScriptedInference::new(script));
        let actuator = Arc::new(RecordingActuator::default());
        let actuation = Arc::new(ActuationController::new(
            actuator.clone(),
            Arc::new(CooldownGate::new()),
            clock.clone(),
            FireCommand::default(),
        ));

        let mut settings = SettingsSnapshot::defaults(chrono_tz::UTC);
        settings.enabled_cameras.insert("side".to_string());
        settings.actuation_enabled = true;

        let log = Arc::new(MemoryEventLog::default());
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            requester,
            Arc::new(DetectionDispatcher::new(inference.clone())),
            actuation,
            SettingsHandle::new(settings),
            log.clone(),
            clock.clone(),
        ));

        Harness {
            bus,
            cache,
            queue,
            clock,
            inference,
            actuator,
            log,
            pool,
        }
    }

    #[tokio::test]
    async fn test_motion_with_cached_image_fires() {
        let h = harness(vec![Scripted::Respond(animal(0.8))]);
        h.cache.update("side", vec![1, 2, 3], h.clock.now()).await;

        let record = h.pool.process(WorkItem::motion("side", h.clock.now())).await;
        assert!(record.detected);
        assert!(record.decision.fired);
        assert_eq!(record.decision.reason, DecisionReason::Activated);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(h.actuator.count(), 1);
        assert_eq!(h.log.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_without_image_logs_no_image() {
        let h = harness(vec![]);

        let record = h.pool.process(WorkItem::motion("side", h.clock.now())).await;
        assert_eq!(record.decision.reason, DecisionReason::NoImage);
        assert!(!record.decision.fired);
        assert_eq!(h.inference.call_count(), 0);
        assert_eq!(h.log.count().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_camera_skips_inference() {
        let h = harness(vec![Scripted::Respond(animal(0.9))]);
        let item = WorkItem::periodic("front", Arc::from(vec![5u8]), h.clock.now(), false, h.clock.now());

        let record = h.pool.process(item).await;
        assert_eq!(record.decision.reason, DecisionReason::SkippedDisabledCamera);
        assert_eq!(h.inference.call_count(), 0);
        assert_eq!(h.actuator.count(), 0);
    }

    #[tokio::test]
    async fn test_motion_for_disabled_camera_requests_nothing() {
        let h = harness(vec![Scripted::Respond(animal(0.9))]);
        h.bus.set_auto_reply("front", vec![7, 7]);

        let started = tokio::time::Instant::now();
        let record = h.pool.process(WorkItem::motion("front", h.clock.now())).await;
        assert_eq!(record.decision.reason, DecisionReason::SkippedDisabledCamera);
        assert!(record.image_captured_at.is_none());
        assert!(h.bus.published().is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(h.inference.call_count(), 0);
        assert_eq!(h.log.count().await, 1);
    }

    #[tokio::test]
    async fn test_below_threshold_recorded_as_not_detected() {
        let h = harness(vec![Scripted::Respond(animal(0.45))]);
        let item = WorkItem::periodic("side", Arc::from(vec![5u8]), h.clock.now(), false, h.clock.now());

        let record = h.pool.process(item).await;
        assert!(!record.detected);
        assert_eq!(record.confidence, Some(0.45));
        assert_eq!(record.decision.reason, DecisionReason::BelowThreshold);
        assert_eq!(h.actuator.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_timeouts_never_actuate() {
        let h = harness(vec![Scripted::Hang, Scripted::Hang]);
        let item = WorkItem::periodic("side", Arc::from(vec![5u8]), h.clock.now(), false, h.clock.now());

        let record = h.pool.process(item).await;
        assert_eq!(record.decision.reason, DecisionReason::InferenceFailed);
        assert!(record.failure.is_some());
        assert_eq!(h.inference.call_count(), 2);
        assert_eq!(h.actuator.count(), 0);
        assert_eq!(h.log.count().await, 1);
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let h = harness(vec![
            Scripted::Respond(animal(0.1)),
            Scripted::Respond(animal(0.1)),
            Scripted::Respond(animal(0.1)),
        ]);
        for _ in 0..3 {
            h.queue.push(WorkItem::periodic(
                "side",
                Arc::from(vec![5u8]),
                h.clock.now(),
                false,
                h.clock.now(),
            ));
        }

        let shutdown = CancellationToken::new();
        let handles = h.pool.clone().start(shutdown.clone());
        for _ in 0..100 {
            if h.pool.processed() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.pool.processed(), 3);
        assert_eq!(h.log.count().await, 3);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
