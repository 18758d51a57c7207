//! AiClient - Inference Service Adapter
//!
//! ## Responsibilities
//!
//! - Send snapshot images to the inference service
//! - Parse the detection response
//! - Health check for the status endpoint

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounding box in image pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Inference service response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Whether the model saw an animal at all
    pub detected: bool,
    pub confidence: f32,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub model_version: String,
}

/// Inference service port
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn detect(&self, camera_id: &str, image: &[u8]) -> Result<InferenceResponse>;
}

/// HTTP inference client (`POST {base_url}/detect`, multipart image)
pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AiClient {
    /// Create new AI client
    pub fn new(base_url: String) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new AI client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Check inference service health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl InferenceClient for AiClient {
    async fn detect(&self, camera_id: &str, image: &[u8]) -> Result<InferenceResponse> {
        let url = format!("{}/detect", self.base_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(image.to_vec())
                    .file_name("snapshot.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("camera_id", camera_id.to_string());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("inference request: {}", e))
                } else {
                    Error::Network(format!("inference request: {}", e))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "inference failed: {} - {}",
                status, body
            )));
        }

        let result: InferenceResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(format!("malformed inference response: {}", e)))?;

        if !result.confidence.is_finite() {
            return Err(Error::Inference(format!(
                "confidence is not a number: {}",
                result.confidence
            )));
        }

        Ok(result)
    }
}
