//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResponse;
use crate::actuation::CooldownState;
use crate::dispatch_queue::QueueStats;
use crate::error::{Error, Result};
use crate::polling_orchestrator::CycleStats;
use crate::settings_sync::{ActiveHours, SettingsSnapshot};
use crate::snapshot_cache::CacheStats;
use crate::state::AppState;

/// Upper bound for `/api/events?limit=`
const MAX_EVENT_LIMIT: usize = 500;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(system_status))
        .route("/api/events", get(list_events))
        .route("/api/events/:correlation_id", get(get_event))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct SettingsView {
    version: u64,
    confidence_threshold: f32,
    enabled_cameras: Vec<String>,
    active_hours: ActiveHours,
    timezone: String,
    cooldown_sec: u64,
    actuation_enabled: bool,
    poll_interval_sec: u64,
    synced_at: Option<DateTime<Utc>>,
    active_now: bool,
}

impl SettingsView {
    fn new(settings: &SettingsSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            version: settings.version,
            confidence_threshold: settings.confidence_threshold,
            enabled_cameras: settings.enabled_cameras.iter().cloned().collect(),
            active_hours: settings.active_hours,
            timezone: settings.timezone.name().to_string(),
            cooldown_sec: settings.cooldown.as_secs(),
            actuation_enabled: settings.actuation_enabled,
            poll_interval_sec: settings.poll_interval.as_secs(),
            synced_at: settings.synced_at,
            active_now: settings.is_active_at(now),
        }
    }
}

#[derive(Debug, Serialize)]
struct CooldownView {
    #[serde(flatten)]
    state: CooldownState,
    remaining_sec: i64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: String,
    uptime_sec: i64,
    workers: usize,
    processed: u64,
    /// Records written since start, including ones evicted from memory
    events_recorded: u64,
    queue: QueueStats,
    cache: CacheStats,
    cooldown: CooldownView,
    settings: SettingsView,
    last_settings_sync: Option<DateTime<Utc>>,
    last_poll_cycle: Option<CycleStats>,
}

/// Runtime status
async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.clock.now();
    let settings = state.settings.load();

    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: (now - state.started_at).num_seconds(),
        workers: state.workers.worker_count(),
        processed: state.workers.processed(),
        events_recorded: state.recent_events.total_written().await,
        queue: state.queue.stats(),
        cache: state.cache.stats().await,
        cooldown: CooldownView {
            state: state.cooldown.state().await,
            remaining_sec: state
                .cooldown
                .remaining(now, settings.cooldown)
                .await
                .num_seconds(),
        },
        settings: SettingsView::new(&settings, now),
        last_settings_sync: state.synchronizer.last_success().await,
        last_poll_cycle: state.polling.last_cycle().await,
    };

    Json(ApiResponse::success(response))
}

#[derive(Deserialize)]
struct EventQuery {
    limit: Option<usize>,
    camera_id: Option<String>,
}

/// Recent outcomes, newest first
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(100).min(MAX_EVENT_LIMIT);
    if limit == 0 {
        return Err(Error::Validation("limit must be at least 1".to_string()));
    }

    let events = if let Some(camera_id) = query.camera_id {
        state.recent_events.get_by_camera(&camera_id, limit).await
    } else {
        state.recent_events.get_latest(limit).await
    };

    Ok(Json(ApiResponse::success(events)))
}

/// One outcome by correlation id
async fn get_event(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let event = state.recent_events.find(correlation_id).await.ok_or_else(|| {
        Error::NotFound(format!("Event {} not found", correlation_id))
    })?;
    Ok(Json(ApiResponse::success(event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::tests::RecordingActuator;
    use crate::actuation::{ActuationController, CooldownGate, DecisionReason, FireCommand};
    use crate::clock::{Clock, ManualClock};
    use crate::detection::tests::ScriptedInference;
    use crate::detection::DetectionDispatcher;
    use crate::dispatch_queue::{DispatchQueue, WorkItem};
    use crate::event_bus::{InMemoryBus, SnapshotRequester, Topics};
    use crate::event_log_service::tests::record;
    use crate::event_log_service::{EventLogSink, MemoryEventLog};
    use crate::polling_orchestrator::PollingOrchestrator;
    use crate::settings_sync::tests::ScriptedStore;
    use crate::settings_sync::{SettingsHandle, SettingsSynchronizer};
    use crate::snapshot_cache::SnapshotCache;
    use crate::worker_pool::WorkerPool;
    use axum::http::StatusCode;
    use axum::response::Response;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;

    fn app_state() -> AppState {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ));
        let cache = Arc::new(SnapshotCache::with_defaults());
        let queue = Arc::new(DispatchQueue::new());
        let (bus, _inbound) = InMemoryBus::channel(4);
        let requester = Arc::new(SnapshotRequester::new(
            Arc::new(bus),
            Topics::default(),
            cache.clone(),
            clock.clone(),
        ));
        let settings = SettingsHandle::new(SettingsSnapshot::defaults(chrono_tz::UTC));
        let synchronizer = Arc::new(SettingsSynchronizer::new(
            Arc::new(ScriptedStore::new(vec![])),
            settings.clone(),
            clock.clone(),
            chrono_tz::UTC,
            Duration::from_secs(30),
        ));
        let cooldown = Arc::new(CooldownGate::new());
        let actuation = Arc::new(ActuationController::new(
            Arc::new(RecordingActuator::default()),
            cooldown.clone(),
            clock.clone(),
            FireCommand::default(),
        ));
        let recent_events = Arc::new(MemoryEventLog::default());
        let polling = Arc::new(PollingOrchestrator::new(
            requester.clone(),
            queue.clone(),
            settings.clone(),
            clock.clone(),
            vec![],
        ));
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            requester,
            Arc::new(DetectionDispatcher::new(Arc::new(ScriptedInference::new(vec![])))),
            actuation,
            settings.clone(),
            recent_events.clone(),
            clock.clone(),
        ));

        AppState {
            queue,
            cache,
            settings,
            synchronizer,
            cooldown,
            recent_events,
            polling,
            workers,
            started_at: clock.now(),
            clock,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_queue_and_settings() {
        let state = app_state();
        state.queue.push(WorkItem::motion("side", state.clock.now()));

        let json = body_json(system_status(State(state)).await.into_response()).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"]["queue"]["high_pending"], 1);
        assert_eq!(json["data"]["events_recorded"], 0);
        assert_eq!(json["data"]["settings"]["confidence_threshold"].as_f64().unwrap() as f32, 0.6);
        assert_eq!(json["data"]["settings"]["actuation_enabled"], false);
        assert_eq!(json["data"]["cooldown"]["remaining_sec"], 0);
        assert!(json["data"]["last_poll_cycle"].is_null());
    }

    #[tokio::test]
    async fn test_events_newest_first_with_limit() {
        let state = app_state();
        for reason in [DecisionReason::NotDetected, DecisionReason::Activated] {
            state.recent_events.write(&record("side", reason)).await.unwrap();
        }

        let query = EventQuery {
            limit: Some(1),
            camera_id: None,
        };
        let json = body_json(
            list_events(State(state), Query(query)).await.into_response(),
        )
        .await;
        let events = json["data"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["decision"]["reason"], "activated");
    }

    #[tokio::test]
    async fn test_events_reject_zero_limit() {
        let state = app_state();
        let query = EventQuery {
            limit: Some(0),
            camera_id: None,
        };
        let response = list_events(State(state), Query(query)).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error_code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_get_event_by_correlation_id() {
        let state = app_state();
        let stored = record("side", DecisionReason::Activated);
        state.recent_events.write(&stored).await.unwrap();

        let response = get_event(State(state.clone()), Path(stored.correlation_id))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["camera_id"], "side");
        assert_eq!(json["data"]["decision"]["reason"], "activated");

        let missing = get_event(State(state), Path(Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
