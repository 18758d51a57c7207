//! SnapshotStore - Snapshot Files and Retention
//!
//! ## Responsibilities
//!
//! - Save each evaluated image under `<base>/<camera>/<ts>_<correlation>.jpg`
//! - Write a `.meta.json` sidecar next to it describing the outcome
//! - Sweep undetected periodic snapshots once they are past retention
//!
//! ## Retention rule
//!
//! A file is deleted only when its sidecar parses and states LOW
//! priority, no detection and a capture time older than the retention
//! window. Files without a readable sidecar are kept.

use crate::clock::Clock;
use crate::dispatch_queue::Priority;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const IMAGE_EXT: &str = "jpg";
const SIDECAR_EXT: &str = "meta.json";

/// Sidecar contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub camera_id: String,
    pub correlation_id: Uuid,
    pub priority: Priority,
    pub detected: bool,
    pub captured_at: DateTime<Utc>,
}

impl SnapshotMeta {
    /// Whether the sweep may delete this snapshot at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.priority == Priority::Low && !self.detected && now - self.captured_at > retention
    }
}

/// Filesystem snapshot store
pub struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Save an image and its sidecar, returning the image path
    pub async fn save(&self, meta: &SnapshotMeta, image: &[u8]) -> Result<PathBuf> {
        let camera_dir = self.base_dir.join(dir_name(&meta.camera_id));
        fs::create_dir_all(&camera_dir).await?;

        let stem = format!(
            "{}_{}",
            meta.captured_at.format("%Y%m%dT%H%M%S%3fZ"),
            meta.correlation_id
        );
        let image_path = camera_dir.join(format!("{}.{}", stem, IMAGE_EXT));
        fs::write(&image_path, image).await?;

        // Image first: a missing sidecar keeps the file
        let sidecar = serde_json::to_vec_pretty(meta)?;
        fs::write(sidecar_path(&image_path), sidecar).await?;

        tracing::debug!(
            camera_id = %meta.camera_id,
            path = %image_path.display(),
            size = image.len(),
            "Snapshot saved"
        );
        Ok(image_path)
    }

    /// Read the sidecar for an image
    pub async fn read_meta(&self, image_path: &Path) -> Result<SnapshotMeta> {
        let raw = fs::read(sidecar_path(image_path)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// All image files, grouped by camera directory
    async fn list_images(&self) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();
        if !fs::try_exists(&self.base_dir).await? {
            return Ok(images);
        }

        let mut cameras = fs::read_dir(&self.base_dir).await?;
        while let Some(camera) = cameras.next_entry().await? {
            if !camera.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(camera.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) == Some(IMAGE_EXT) {
                    images.push(path);
                }
            }
        }
        Ok(images)
    }
}

fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(SIDECAR_EXT)
}

/// Camera ids are opaque; keep directory names to a safe alphabet
fn dir_name(camera_id: &str) -> String {
    let name: String = camera_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
    /// Kept because the sidecar was missing or unreadable
    pub unreadable: usize,
    pub bytes_freed: u64,
}

/// Background retention sweep
pub struct RetentionSweeper {
    store: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<SnapshotStore>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention,
            interval,
        }
    }

    /// Run one sweep over every camera directory
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        for image in self.store.list_images().await? {
            stats.scanned += 1;

            let meta = match self.store.read_meta(&image).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(
                        path = %image.display(),
                        error = %e,
                        "Snapshot sidecar unreadable, keeping file"
                    );
                    stats.unreadable += 1;
                    stats.kept += 1;
                    continue;
                }
            };

            if !meta.is_expired(now, self.retention) {
                stats.kept += 1;
                continue;
            }

            let size = fs::metadata(&image).await.map(|m| m.len()).unwrap_or(0);
            if let Err(e) = fs::remove_file(&image).await {
                tracing::warn!(
                    path = %image.display(),
                    error = %e,
                    "Failed to delete expired snapshot"
                );
                stats.kept += 1;
                continue;
            }
            if let Err(e) = fs::remove_file(sidecar_path(&image)).await {
                tracing::warn!(path = %image.display(), error = %e, "Failed to delete sidecar");
            }

            stats.deleted += 1;
            stats.bytes_freed += size;
            tracing::debug!(
                camera_id = %meta.camera_id,
                path = %image.display(),
                "Deleted expired snapshot"
            );
        }

        if stats.deleted > 0 || stats.unreadable > 0 {
            tracing::info!(
                scanned = stats.scanned,
                deleted = stats.deleted,
                unreadable = stats.unreadable,
                bytes_freed = stats.bytes_freed,
                "Retention sweep finished"
            );
        }
        Ok(stats)
    }

    /// Start the sweep loop (background task)
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                retention_hours = self.retention.num_hours(),
                interval_sec = self.interval.as_secs(),
                "Retention sweeper started"
            );
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once().await {
                    tracing::error!(error = %e, "Retention sweep failed");
                }
            }

            tracing::info!("Retention sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("yardwatch-store-{}", Uuid::new_v4()))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn meta(camera: &str, priority: Priority, detected: bool) -> SnapshotMeta {
        SnapshotMeta {
            camera_id: camera.to_string(),
            correlation_id: Uuid::new_v4(),
            priority,
            detected,
            captured_at: t0(),
        }
    }

    fn sweeper(store: Arc<SnapshotStore>, clock: Arc<ManualClock>) -> RetentionSweeper {
        RetentionSweeper::new(
            store,
            clock,
            chrono::Duration::hours(48),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_save_writes_image_and_sidecar() {
        let dir = temp_dir();
        let store = SnapshotStore::new(&dir);
        let m = meta("side", Priority::High, true);

        let path = store.save(&m, &[0xff, 0xd8]).await.unwrap();
        assert!(path.starts_with(dir.join("side")));
        assert_eq!(fs::read(&path).await.unwrap(), vec![0xff, 0xd8]);
        assert_eq!(store.read_meta(&path).await.unwrap(), m);

        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_undetected_periodic() {
        let dir = temp_dir();
        let store = Arc::new(SnapshotStore::new(&dir));
        let expired = store.save(&meta("side", Priority::Low, false), b"a").await.unwrap();
        let detected = store.save(&meta("side", Priority::Low, true), b"b").await.unwrap();
        let motion = store.save(&meta("front", Priority::High, false), b"c").await.unwrap();

        let clock = Arc::new(ManualClock::new(t0() + chrono::Duration::hours(49)));
        let stats = sweeper(store, clock).sweep_once().await.unwrap();

        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.deleted, 1);
        assert!(!fs::try_exists(&expired).await.unwrap());
        assert!(!fs::try_exists(sidecar_path(&expired)).await.unwrap());
        assert!(fs::try_exists(&detected).await.unwrap());
        assert!(fs::try_exists(&motion).await.unwrap());

        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_sweep_keeps_files_inside_retention() {
        let dir = temp_dir();
        let store = Arc::new(SnapshotStore::new(&dir));
        let path = store.save(&meta("side", Priority::Low, false), b"a").await.unwrap();

        let clock = Arc::new(ManualClock::new(t0() + chrono::Duration::hours(47)));
        let stats = sweeper(store, clock).sweep_once().await.unwrap();

        assert_eq!(stats.deleted, 0);
        assert!(fs::try_exists(&path).await.unwrap());
        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_sweep_keeps_files_without_sidecar() {
        let dir = temp_dir();
        let store = Arc::new(SnapshotStore::new(&dir));
        let path = store.save(&meta("side", Priority::Low, false), b"a").await.unwrap();
        fs::write(sidecar_path(&path), b"{not json").await.unwrap();

        let orphan = dir.join("side").join("orphan.jpg");
        fs::write(&orphan, b"x").await.unwrap();

        let clock = Arc::new(ManualClock::new(t0() + chrono::Duration::days(30)));
        let stats = sweeper(store, clock).sweep_once().await.unwrap();

        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.unreadable, 2);
        assert!(fs::try_exists(&path).await.unwrap());
        assert!(fs::try_exists(&orphan).await.unwrap());
        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_sweep_on_missing_dir_is_empty() {
        let store = Arc::new(SnapshotStore::new(temp_dir()));
        let clock = Arc::new(ManualClock::new(t0()));
        assert_eq!(sweeper(store, clock).sweep_once().await.unwrap(), SweepStats::default());
    }

    #[test]
    fn test_dir_name_sanitized() {
        assert_eq!(dir_name("side-yard_2"), "side-yard_2");
        assert_eq!(dir_name("../etc"), "___etc");
        assert_eq!(dir_name(""), "_");
    }
}
