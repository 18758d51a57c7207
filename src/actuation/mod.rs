//! Actuation - Cooldown-Gated Deterrent Control
//!
//! ## Responsibilities
//!
//! - Turn a positive detection into a fire/no-fire decision
//! - Enforce "at most one activation per cooldown window"
//! - Issue the fire command to the actuator and record its result
//!
//! ## Decision order
//!
//! 1. actuation disabled          -> `disabled`
//! 2. outside active hours        -> `outside-active-hours`
//! 3. cooldown window still open  -> `cooldown-active`
//! 4. otherwise record the activation time, then fire -> `activated`
//!
//! The activation time is recorded before the command is sent and is
//! never rolled back, even when the command fails.

mod cooldown;

pub use cooldown::{CooldownCheck, CooldownGate, CooldownState};

use crate::clock::Clock;
use crate::detection::DetectionResult;
use crate::error::{Error, Result};
use crate::settings_sync::SettingsSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Actuator call timeout
pub const ACTUATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    Activated,
    Disabled,
    OutsideActiveHours,
    CooldownActive,
    BelowThreshold,
    NotDetected,
    InferenceFailed,
    NoImage,
    SkippedDisabledCamera,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Activated => "activated",
            DecisionReason::Disabled => "disabled",
            DecisionReason::OutsideActiveHours => "outside-active-hours",
            DecisionReason::CooldownActive => "cooldown-active",
            DecisionReason::BelowThreshold => "below-threshold",
            DecisionReason::NotDetected => "not-detected",
            DecisionReason::InferenceFailed => "inference-failed",
            DecisionReason::NoImage => "no-image",
            DecisionReason::SkippedDisabledCamera => "skipped-disabled-camera",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire/no-fire decision attached to one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationDecision {
    pub fired: bool,
    pub reason: DecisionReason,
    pub decided_at: DateTime<Utc>,
    /// Set when the fire command was issued but failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actuation_error: Option<String>,
}

impl ActuationDecision {
    pub fn not_fired(reason: DecisionReason, decided_at: DateTime<Utc>) -> Self {
        Self {
            fired: false,
            reason,
            decided_at,
            actuation_error: None,
        }
    }
}

/// Fire command sent to the actuator
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FireCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
}

/// Actuator port
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn fire(&self, command: &FireCommand) -> Result<()>;
}

/// HTTP actuator (`POST {base_url}/fire`)
pub struct HttpActuator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActuator {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ACTUATOR_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn fire(&self, command: &FireCommand) -> Result<()> {
        let url = format!("{}/fire", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(command)
            .send()
            .await
            .map_err(|e| Error::Actuator(format!("fire request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Actuator(format!(
                "fire rejected: HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

/// Cooldown-gated actuation controller shared by all workers
pub struct ActuationController {
    actuator: Arc<dyn Actuator>,
    cooldown: Arc<CooldownGate>,
    clock: Arc<dyn Clock>,
    command: FireCommand,
    timeout: Duration,
}

impl ActuationController {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        cooldown: Arc<CooldownGate>,
        clock: Arc<dyn Clock>,
        command: FireCommand,
    ) -> Self {
        Self {
            actuator,
            cooldown,
            clock,
            command,
            timeout: ACTUATOR_TIMEOUT,
        }
    }

    pub fn cooldown(&self) -> &Arc<CooldownGate> {
        &self.cooldown
    }

    /// Decide (and possibly fire) for one detection
    ///
    /// Results with `detected == false` never fire.
    pub async fn decide(
        &self,
        camera_id: &str,
        detection: &DetectionResult,
        settings: &SettingsSnapshot,
    ) -> ActuationDecision {
        let now = self.clock.now();

        if !detection.detected {
            let reason = if detection.raw_detected {
                DecisionReason::BelowThreshold
            } else {
                DecisionReason::NotDetected
            };
            return ActuationDecision::not_fired(reason, now);
        }

        if !settings.actuation_enabled {
            return ActuationDecision::not_fired(DecisionReason::Disabled, now);
        }

        if !settings.is_active_at(now) {
            return ActuationDecision::not_fired(DecisionReason::OutsideActiveHours, now);
        }

        match self.cooldown.try_acquire(now, settings.cooldown).await {
            CooldownCheck::Active { remaining } => {
                tracing::info!(
                    camera_id = %camera_id,
                    remaining_sec = remaining.num_seconds(),
                    "Detection inside cooldown window, not firing"
                );
                ActuationDecision::not_fired(DecisionReason::CooldownActive, now)
            }
            CooldownCheck::Acquired => {
                let actuation_error = self.fire(camera_id).await.err().map(|e| e.to_string());
                ActuationDecision {
                    fired: true,
                    reason: DecisionReason::Activated,
                    decided_at: now,
                    actuation_error,
                }
            }
        }
    }

    async fn fire(&self, camera_id: &str) -> Result<()> {
        let result = tokio::time::timeout(self.timeout, self.actuator.fire(&self.command))
            .await
            .map_err(|_| Error::Timeout("actuator fire".to_string()))
            .and_then(|r| r);

        match &result {
            Ok(()) => tracing::info!(
                camera_id = %camera_id,
                zone = ?self.command.zone,
                "Deterrent activated"
            ),
            Err(e) => tracing::error!(
                camera_id = %camera_id,
                error = %e,
                "Deterrent command failed; cooldown stays in effect"
            ),
        }
        result
    }
}
