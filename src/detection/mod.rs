//! Detection - Inference Dispatch and Threshold Evaluation
//!
//! ## Responsibilities
//!
//! - Skip inference for cameras that are not enabled
//! - Call the inference service with a bounded timeout
//! - Retry once after a short backoff, then give up
//! - Apply the current confidence threshold
//!
//! A failed detection never leads to actuation.

use crate::ai_client::{BoundingBox, InferenceClient};
use crate::error::{Error, Result};
use crate::settings_sync::SettingsSnapshot;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt inference timeout
pub const INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before the single retry
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Result of one inference, evaluated against the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// `raw_detected && confidence >= threshold`
    pub detected: bool,
    /// What the model said before thresholding
    pub raw_detected: bool,
    /// Clamped to [0, 1]
    pub confidence: f32,
    /// Threshold in force when this result was evaluated
    pub threshold: f32,
    pub boxes: Vec<BoundingBox>,
    pub model_id: String,
}

/// What the dispatcher did with a work item
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Evaluated(DetectionResult),
    SkippedDisabledCamera,
    InferenceFailed(String),
}

/// Detection dispatcher shared by all workers
pub struct DetectionDispatcher {
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl DetectionDispatcher {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            timeout: INFERENCE_TIMEOUT,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_timeouts(mut self, timeout: Duration, retry_backoff: Duration) -> Self {
        self.timeout = timeout;
        self.retry_backoff = retry_backoff;
        self
    }

    /// Run inference for one camera image under the given settings
    pub async fn dispatch(
        &self,
        camera_id: &str,
        image: &[u8],
        settings: &SettingsSnapshot,
    ) -> DispatchOutcome {
        if !settings.is_camera_enabled(camera_id) {
            tracing::debug!(camera_id = %camera_id, "Camera not enabled, skipping inference");
            return DispatchOutcome::SkippedDisabledCamera;
        }

        let response = match self.call_once(camera_id, image).await {
            Ok(resp) => resp,
            Err(first) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %first,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "Inference failed, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;

                match self.call_once(camera_id, image).await {
                    Ok(resp) => resp,
                    Err(second) => {
                        tracing::error!(
                            camera_id = %camera_id,
                            error = %second,
                            "Inference failed after retry"
                        );
                        return DispatchOutcome::InferenceFailed(second.to_string());
                    }
                }
            }
        };

        let threshold = settings.confidence_threshold;
        let confidence = response.confidence.clamp(0.0, 1.0);

        DispatchOutcome::Evaluated(DetectionResult {
            detected: response.detected && confidence >= threshold,
            raw_detected: response.detected,
            confidence,
            threshold,
            boxes: response.boxes,
            model_id: response.model_version,
        })
    }

    async fn call_once(
        &self,
        camera_id: &str,
        image: &[u8],
    ) -> Result<crate::ai_client::InferenceResponse> {
        tokio::time::timeout(self.timeout, self.client.detect(camera_id, image))
            .await
            .map_err(|_| Error::Timeout(format!("inference after {:?}", self.timeout)))?
    }
}
