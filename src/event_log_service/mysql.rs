//! MySQL event log (`yard_events` table)

use super::{EventLogSink, EventRecord};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::mysql::MySqlPool;

pub struct MySqlEventLog {
    pool: MySqlPool,
}

impl MySqlEventLog {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS yard_events (
                correlation_id CHAR(36) NOT NULL PRIMARY KEY,
                camera_id VARCHAR(128) NOT NULL,
                priority VARCHAR(8) NOT NULL,
                enqueued_at DATETIME(3) NOT NULL,
                processed_at DATETIME(3) NOT NULL,
                image_captured_at DATETIME(3) NULL,
                image_stale BOOLEAN NOT NULL DEFAULT FALSE,
                detected BOOLEAN NOT NULL,
                confidence FLOAT NULL,
                boxes JSON NOT NULL,
                model_id VARCHAR(128) NULL,
                fired BOOLEAN NOT NULL,
                reason VARCHAR(32) NOT NULL,
                actuation_error TEXT NULL,
                snapshot_path VARCHAR(512) NULL,
                failure TEXT NULL,
                INDEX idx_camera_processed (camera_id, processed_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventLogSink for MySqlEventLog {
    async fn write(&self, record: &EventRecord) -> Result<()> {
        let boxes_json = serde_json::to_string(&record.boxes)?;

        // Replays of the same correlation id overwrite the earlier row
        sqlx::query(
            r#"
            INSERT INTO yard_events (
                correlation_id, camera_id, priority,
                enqueued_at, processed_at, image_captured_at, image_stale,
                detected, confidence, boxes, model_id,
                fired, reason, actuation_error, snapshot_path, failure
            ) VALUES (
                ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?, ?
            )
            ON DUPLICATE KEY UPDATE
                processed_at = VALUES(processed_at),
                detected = VALUES(detected),
                confidence = VALUES(confidence),
                boxes = VALUES(boxes),
                fired = VALUES(fired),
                reason = VALUES(reason),
                actuation_error = VALUES(actuation_error),
                snapshot_path = VALUES(snapshot_path),
                failure = VALUES(failure)
            "#,
        )
        .bind(record.correlation_id.to_string())
        .bind(&record.camera_id)
        .bind(record.priority.as_str())
        .bind(record.enqueued_at)
        .bind(record.processed_at)
        .bind(record.image_captured_at)
        .bind(record.image_stale)
        .bind(record.detected)
        .bind(record.confidence)
        .bind(&boxes_json)
        .bind(&record.model_id)
        .bind(record.decision.fired)
        .bind(record.decision.reason.as_str())
        .bind(&record.decision.actuation_error)
        .bind(&record.snapshot_path)
        .bind(&record.failure)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}
