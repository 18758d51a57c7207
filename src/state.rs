//! Application state
//!
//! Process configuration and the shared components handed to the status API

use crate::actuation::CooldownGate;
use crate::clock::Clock;
use crate::detection::INFERENCE_TIMEOUT;
use crate::dispatch_queue::DispatchQueue;
use crate::event_bus::IMAGE_WAIT_TIMEOUT;
use crate::event_log_service::{MemoryEventLog, EVENT_LOG_TIMEOUT};
use crate::polling_orchestrator::PollingOrchestrator;
use crate::settings_sync::{SettingsHandle, SettingsSynchronizer};
use crate::snapshot_cache::SnapshotCache;
use crate::worker_pool::WorkerPool;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot retention when RETENTION_HOURS is unset or invalid
pub const DEFAULT_RETENTION_HOURS: i64 = 48;

/// Where event records are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogBackend {
    Http,
    MySql,
    Memory,
}

impl EventLogBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "mysql" => Some(Self::MySql),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// MQTT broker host
    pub mqtt_host: String,
    /// MQTT broker port
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// Topic prefix (`{prefix}/{camera}/motion`)
    pub mqtt_topic_prefix: String,
    /// Run without a broker (in-process bus)
    pub mqtt_disabled: bool,
    /// Inference service URL
    pub inference_url: String,
    /// Settings store URL
    pub settings_url: String,
    /// Actuator URL
    pub actuator_url: String,
    pub actuator_zone: Option<String>,
    pub actuator_duration_sec: Option<u32>,
    pub event_log_backend: EventLogBackend,
    pub event_log_url: Option<String>,
    /// Database URL (MySQL event log)
    pub database_url: Option<String>,
    /// Snapshot storage directory
    pub snapshot_dir: PathBuf,
    pub worker_count: usize,
    /// Timezone for active hours
    pub timezone: Tz,
    /// Cameras with periodic coverage (empty = every enabled camera)
    pub periodic_cameras: Vec<String>,
    /// Status API host
    pub host: String,
    /// Status API port
    pub port: u16,
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
    pub settings_sync_interval: Duration,
    /// Bounded wait for a requested image
    pub image_wait: Duration,
    /// Cached image age still reused for a motion item
    pub image_reuse_window: chrono::Duration,
    pub inference_timeout: Duration,
    pub event_log_timeout: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Retention in hours, falling back to the default when out of range
fn retention_hours(hours: i64) -> chrono::Duration {
    chrono::Duration::try_hours(hours)
        .filter(|d| *d > chrono::Duration::zero())
        .unwrap_or_else(|| {
            tracing::warn!(value = hours, "RETENTION_HOURS out of range, using default");
            chrono::Duration::hours(DEFAULT_RETENTION_HOURS)
        })
}

/// Split a comma list, dropping blanks
pub fn parse_camera_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        let timezone = env_or("TIMEZONE", "UTC");
        let backend = env_or("EVENT_LOG_BACKEND", "memory");

        Self {
            mqtt_host: env_or("MQTT_HOST", "localhost"),
            mqtt_port: env_parse("MQTT_PORT", 1883),
            mqtt_client_id: env_or("MQTT_CLIENT_ID", "yardwatch"),
            mqtt_username: env_opt("MQTT_USERNAME"),
            mqtt_password: env_opt("MQTT_PASSWORD"),
            mqtt_topic_prefix: env_or("MQTT_TOPIC_PREFIX", "camera"),
            mqtt_disabled: env_parse("MQTT_DISABLED", false),
            inference_url: env_or("INFERENCE_URL", "http://localhost:9000"),
            settings_url: env_or("SETTINGS_URL", "http://localhost:9100/settings"),
            actuator_url: env_or("ACTUATOR_URL", "http://localhost:9200"),
            actuator_zone: env_opt("ACTUATOR_ZONE"),
            actuator_duration_sec: env_opt("ACTUATOR_DURATION_SEC").and_then(|v| v.parse().ok()),
            event_log_backend: EventLogBackend::parse(&backend).unwrap_or_else(|| {
                tracing::warn!(value = %backend, "Unknown EVENT_LOG_BACKEND, using memory");
                EventLogBackend::Memory
            }),
            event_log_url: env_opt("EVENT_LOG_URL"),
            database_url: env_opt("DATABASE_URL"),
            snapshot_dir: std::env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/yardwatch/snapshots")),
            worker_count: env_parse("WORKER_COUNT", crate::worker_pool::DEFAULT_WORKER_COUNT).max(1),
            timezone: timezone.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %timezone, "Unknown TIMEZONE, using UTC");
                chrono_tz::UTC
            }),
            periodic_cameras: parse_camera_list(&env_or("PERIODIC_CAMERAS", "")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            retention: retention_hours(env_parse("RETENTION_HOURS", DEFAULT_RETENTION_HOURS)),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SEC", 3600).max(1)),
            settings_sync_interval: Duration::from_secs(
                env_parse("SETTINGS_SYNC_INTERVAL_SEC", 30).max(1),
            ),
            image_wait: Duration::from_millis(env_parse(
                "IMAGE_WAIT_MS",
                IMAGE_WAIT_TIMEOUT.as_millis() as u64,
            )),
            image_reuse_window: chrono::Duration::seconds(
                env_parse("IMAGE_REUSE_SEC", 5u32).into(),
            ),
            inference_timeout: Duration::from_secs(
                env_parse("INFERENCE_TIMEOUT_SEC", INFERENCE_TIMEOUT.as_secs()).max(1),
            ),
            event_log_timeout: Duration::from_secs(
                env_parse("EVENT_LOG_TIMEOUT_SEC", EVENT_LOG_TIMEOUT.as_secs()).max(1),
            ),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DispatchQueue>,
    pub cache: Arc<SnapshotCache>,
    /// Current settings (atomic snapshot)
    pub settings: SettingsHandle,
    pub synchronizer: Arc<SettingsSynchronizer>,
    pub cooldown: Arc<CooldownGate>,
    /// Recent outcomes
    pub recent_events: Arc<MemoryEventLog>,
    pub polling: Arc<PollingOrchestrator>,
    pub workers: Arc<WorkerPool>,
    pub clock: Arc<dyn Clock>,
    pub started_at: DateTime<Utc>,
}
