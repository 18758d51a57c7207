//! Settings types

use crate::error::{Error, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Settings Store response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub confidence_threshold: f32,
    #[serde(default)]
    pub enabled_cameras: Vec<String>,
    pub active_hours: ActiveHoursPayload,
    pub cooldown_seconds: i64,
    pub actuation_enabled: bool,
    pub poll_interval_seconds: i64,
}

/// Active hours as delivered by the Settings Store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHoursPayload {
    pub start_hour: i32,
    pub end_hour: i32,
}

/// Local wall-clock window during which detection and actuation run
///
/// `start == end` is treated as "always active". `start > end` wraps
/// past midnight, e.g. 20..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ActiveHours {
    pub const ALWAYS: ActiveHours = ActiveHours {
        start_hour: 0,
        end_hour: 24,
    };

    pub fn new(start_hour: i32, end_hour: i32) -> Result<Self> {
        if !(0..=24).contains(&start_hour) || !(0..=24).contains(&end_hour) {
            return Err(Error::Validation(format!(
                "active hours out of range: {}..{}",
                start_hour, end_hour
            )));
        }
        Ok(Self {
            start_hour: start_hour as u32,
            end_hour: end_hour as u32,
        })
    }

    /// Whether the given local hour (0-23) falls inside the window
    pub fn contains_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.start_hour % 24, self.end_hour % 24);
        if start == end {
            return true;
        }
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Whether `now` falls inside the window in the given timezone
    pub fn contains(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        self.contains_hour(now.with_timezone(&tz).hour())
    }
}

/// Immutable, atomically-swapped bundle of operator settings
#[derive(Debug, Clone, Serialize)]
pub struct SettingsSnapshot {
    /// Monotonic publish counter (0 = built-in defaults)
    pub version: u64,
    pub confidence_threshold: f32,
    pub enabled_cameras: BTreeSet<String>,
    pub active_hours: ActiveHours,
    #[serde(skip)]
    pub timezone: Tz,
    pub cooldown: Duration,
    pub actuation_enabled: bool,
    pub poll_interval: Duration,
    /// When this snapshot was pulled from the store
    pub synced_at: Option<DateTime<Utc>>,
}

impl SettingsSnapshot {
    /// Fail-safe defaults used until the first successful sync
    pub fn defaults(timezone: Tz) -> Self {
        Self {
            version: 0,
            confidence_threshold: 0.6,
            enabled_cameras: BTreeSet::new(),
            active_hours: ActiveHours::ALWAYS,
            timezone,
            cooldown: Duration::from_secs(300),
            actuation_enabled: false,
            poll_interval: Duration::from_secs(60),
            synced_at: None,
        }
    }

    /// Validate a store payload and build a snapshot from it
    pub fn from_payload(
        payload: &SettingsPayload,
        timezone: Tz,
        version: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<Self> {
        let threshold = payload.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if payload.cooldown_seconds < 0 {
            return Err(Error::Validation(format!(
                "cooldown_seconds must not be negative, got {}",
                payload.cooldown_seconds
            )));
        }
        if payload.poll_interval_seconds <= 0 {
            return Err(Error::Validation(format!(
                "poll_interval_seconds must be positive, got {}",
                payload.poll_interval_seconds
            )));
        }

        let active_hours = ActiveHours::new(
            payload.active_hours.start_hour,
            payload.active_hours.end_hour,
        )?;

        Ok(Self {
            version,
            confidence_threshold: threshold,
            enabled_cameras: payload
                .enabled_cameras
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            active_hours,
            timezone,
            cooldown: Duration::from_secs(payload.cooldown_seconds as u64),
            actuation_enabled: payload.actuation_enabled,
            poll_interval: Duration::from_secs(payload.poll_interval_seconds as u64),
            synced_at: Some(synced_at),
        })
    }

    pub fn is_camera_enabled(&self, camera_id: &str) -> bool {
        self.enabled_cameras.contains(camera_id)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_hours.contains(now, self.timezone)
    }
}
