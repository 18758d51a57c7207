//! EventLogService - Outcome Recording
//!
//! ## Responsibilities
//!
//! - One `EventRecord` per processed work item, whatever the outcome
//! - `EventLogSink` port with HTTP, MySQL and in-memory ring buffer sinks
//! - `FanoutEventLog`: durable sink plus an in-memory mirror for the status API
//!
//! Records are keyed by correlation id. Sinks must tolerate the same
//! record being written twice.

mod http;
mod memory;
mod mysql;

pub use http::HttpEventLog;
pub use memory::MemoryEventLog;
pub use mysql::MySqlEventLog;

use crate::actuation::ActuationDecision;
use crate::ai_client::BoundingBox;
use crate::dispatch_queue::Priority;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Event log write timeout
pub const EVENT_LOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub correlation_id: Uuid,
    pub camera_id: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    /// Capture time of the image that was evaluated
    pub image_captured_at: Option<DateTime<Utc>>,
    /// Image came from the cache after the wait expired
    #[serde(default)]
    pub image_stale: bool,
    pub detected: bool,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    pub model_id: Option<String>,
    pub decision: ActuationDecision,
    /// Saved snapshot file, if any
    pub snapshot_path: Option<String>,
    /// Inference failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Event log port
#[async_trait]
pub trait EventLogSink: Send + Sync {
    async fn write(&self, record: &EventRecord) -> Result<()>;

    /// Sink name for logs
    fn name(&self) -> &'static str;
}

/// Writes to an optional durable sink and always mirrors into memory
pub struct FanoutEventLog {
    durable: Option<Arc<dyn EventLogSink>>,
    recent: Arc<MemoryEventLog>,
    timeout: Duration,
}

impl FanoutEventLog {
    pub fn new(durable: Option<Arc<dyn EventLogSink>>, recent: Arc<MemoryEventLog>) -> Self {
        Self {
            durable,
            recent,
            timeout: EVENT_LOG_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// In-memory mirror
    pub fn recent(&self) -> &Arc<MemoryEventLog> {
        &self.recent
    }
}

#[async_trait]
impl EventLogSink for FanoutEventLog {
    async fn write(&self, record: &EventRecord) -> Result<()> {
        self.recent.write(record).await?;

        let Some(durable) = &self.durable else {
            return Ok(());
        };

        tokio::time::timeout(self.timeout, durable.write(record))
            .await
            .map_err(|_| Error::Timeout(format!("{} event log write", durable.name())))?
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actuation::DecisionReason;
    use chrono::TimeZone;
    use std::sync::Mutex;

    pub fn record(camera_id: &str, reason: DecisionReason) -> EventRecord {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        EventRecord {
            correlation_id: Uuid::new_v4(),
            camera_id: camera_id.to_string(),
            priority: Priority::High,
            enqueued_at: at,
            processed_at: at,
            image_captured_at: Some(at),
            image_stale: false,
            detected: reason == DecisionReason::Activated,
            confidence: Some(0.8),
            boxes: vec![],
            model_id: Some("critter-v3".to_string()),
            decision: ActuationDecision {
                fired: reason == DecisionReason::Activated,
                reason,
                decided_at: at,
                actuation_error: None,
            },
            snapshot_path: None,
            failure: None,
        }
    }

    /// Sink double that fails or hangs on demand
    pub struct FlakySink {
        pub hang: bool,
        pub writes: Mutex<u32>,
    }

    #[async_trait]
    impl EventLogSink for FlakySink {
        async fn write(&self, _record: &EventRecord) -> Result<()> {
            *self.writes.lock().unwrap() += 1;
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(Error::EventLog("collaborator down".into()))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_fanout_mirrors_even_when_durable_fails() {
        let recent = Arc::new(MemoryEventLog::new(10));
        let durable = Arc::new(FlakySink {
            hang: false,
            writes: Mutex::new(0),
        });
        let log = FanoutEventLog::new(Some(durable.clone()), recent.clone());

        let result = log.write(&record("side", DecisionReason::NotDetected)).await;
        assert!(result.is_err());
        assert_eq!(recent.count().await, 1);
        assert_eq!(*durable.writes.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_bounds_durable_write() {
        let recent = Arc::new(MemoryEventLog::new(10));
        let durable = Arc::new(FlakySink {
            hang: true,
            writes: Mutex::new(0),
        });
        let log = FanoutEventLog::new(Some(durable), recent.clone())
            .with_timeout(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let result = log.write(&record("side", DecisionReason::NoImage)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(started.elapsed() < EVENT_LOG_TIMEOUT);
        assert_eq!(recent.count().await, 1);
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(record("side", DecisionReason::CooldownActive)).unwrap();
        assert_eq!(json["priority"], "high");
        assert_eq!(json["decision"]["reason"], "cooldown-active");
        assert_eq!(json["decision"]["fired"], false);
    }
}
