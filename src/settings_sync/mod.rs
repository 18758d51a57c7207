//! SettingsSync - Operator Settings Synchronization
//!
//! ## Responsibilities
//!
//! - Pull the settings document from the Settings Store on a fixed interval
//! - Validate it into an immutable `SettingsSnapshot`
//! - Publish it by swapping the shared reference (readers never lock)
//! - Keep serving the last-known-good snapshot when the store is down
//!   or returns something malformed

mod types;

pub use types::*;

use crate::clock::Clock;
use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Settings fetch timeout
const SETTINGS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to the currently visible settings snapshot
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<ArcSwap<SettingsSnapshot>>,
}

impl SettingsHandle {
    pub fn new(initial: SettingsSnapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Latest snapshot; the returned Arc stays valid even if a newer one is published
    pub fn load(&self) -> Arc<SettingsSnapshot> {
        self.current.load_full()
    }

    /// Replace the visible snapshot
    pub fn publish(&self, snapshot: SettingsSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

/// Source of settings documents
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn fetch(&self) -> Result<SettingsPayload>;
}

/// Settings Store reached over HTTP (`GET {url}`)
pub struct HttpSettingsStore {
    client: reqwest::Client,
    url: String,
}

impl HttpSettingsStore {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SETTINGS_FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SettingsStore for HttpSettingsStore {
    async fn fetch(&self) -> Result<SettingsPayload> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| {
            Error::SettingsStore(format!("Failed to fetch settings: {}", e))
        })?;

        if !resp.status().is_success() {
            return Err(Error::SettingsStore(format!(
                "Settings fetch failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        resp.json::<SettingsPayload>()
            .await
            .map_err(|e| Error::SettingsStore(format!("Malformed settings payload: {}", e)))
    }
}

/// Outcome of one synchronization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new snapshot was published
    Published(u64),
    /// Store returned the same document as last time
    Unchanged,
}

/// Periodic settings synchronizer
pub struct SettingsSynchronizer {
    store: Arc<dyn SettingsStore>,
    handle: SettingsHandle,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    interval: Duration,
    next_version: AtomicU64,
    last_payload: Mutex<Option<SettingsPayload>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl SettingsSynchronizer {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        handle: SettingsHandle,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        interval: Duration,
    ) -> Self {
        let start_version = handle.load().version + 1;
        Self {
            store,
            handle,
            clock,
            timezone,
            interval,
            next_version: AtomicU64::new(start_version),
            last_payload: Mutex::new(None),
            last_success: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> &SettingsHandle {
        &self.handle
    }

    /// Time of the last successful fetch
    pub async fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().await
    }

    /// Fetch once and publish if the document changed
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let payload = tokio::time::timeout(SETTINGS_FETCH_TIMEOUT, self.store.fetch())
            .await
            .map_err(|_| Error::Timeout("settings fetch".to_string()))??;

        let now = self.clock.now();
        let mut last = self.last_payload.lock().await;

        if last.as_ref() == Some(&payload) {
            *self.last_success.lock().await = Some(now);
            return Ok(SyncOutcome::Unchanged);
        }

        let version = self.next_version.load(Ordering::SeqCst);
        let snapshot = SettingsSnapshot::from_payload(&payload, self.timezone, version, now)?;
        self.next_version.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            version = version,
            threshold = snapshot.confidence_threshold,
            enabled_cameras = ?snapshot.enabled_cameras,
            start_hour = snapshot.active_hours.start_hour,
            end_hour = snapshot.active_hours.end_hour,
            cooldown_sec = snapshot.cooldown.as_secs(),
            actuation_enabled = snapshot.actuation_enabled,
            poll_interval_sec = snapshot.poll_interval.as_secs(),
            "Settings snapshot published"
        );

        self.handle.publish(snapshot);
        *last = Some(payload);
        *self.last_success.lock().await = Some(now);

        Ok(SyncOutcome::Published(version))
    }

    /// Start the sync loop (background task)
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(interval_sec = self.interval.as_secs(), "Settings synchronizer started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.sync_once().await {
                Ok(SyncOutcome::Published(_)) => {}
                Ok(SyncOutcome::Unchanged) => {
                    tracing::trace!("Settings unchanged");
                }
                Err(e) => {
                    let current = self.handle.load();
                    tracing::warn!(
                        error = %e,
                        serving_version = current.version,
                        "Settings sync failed, keeping last-known-good settings"
                    );
                }
            }
        }

        tracing::info!("Settings synchronizer stopped");
    }
}
