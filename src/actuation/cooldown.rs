//! Cooldown gate
//!
//! Check-and-set of the last activation time happens under one mutex
//! shared by every worker, so two concurrent positive detections cannot
//! both pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// Last activation time, absent until the first activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CooldownState {
    pub last_activation_at: Option<DateTime<Utc>>,
}

/// Result of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownCheck {
    /// Window was clear; the activation time has been recorded
    Acquired,
    /// Still inside the window
    Active { remaining: chrono::Duration },
}

/// Shared cooldown gate
#[derive(Debug, Default)]
pub struct CooldownGate {
    state: Mutex<CooldownState>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically test the window and, if clear, mark `now` as the activation
    pub async fn try_acquire(&self, now: DateTime<Utc>, cooldown: Duration) -> CooldownCheck {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_activation_at {
            let window = match chrono::Duration::from_std(cooldown) {
                Ok(window) => window,
                Err(_) => {
                    // Unrepresentable window: treat as still cooling down
                    tracing::error!(
                        cooldown_sec = cooldown.as_secs(),
                        "Cooldown duration out of range, refusing activation"
                    );
                    return CooldownCheck::Active {
                        remaining: chrono::TimeDelta::MAX,
                    };
                }
            };

            let Some(until) = last.checked_add_signed(window) else {
                return CooldownCheck::Active {
                    remaining: chrono::TimeDelta::MAX,
                };
            };
            if now < until {
                return CooldownCheck::Active {
                    remaining: until - now,
                };
            }
        }

        state.last_activation_at = Some(now);
        CooldownCheck::Acquired
    }

    /// Current state snapshot
    pub async fn state(&self) -> CooldownState {
        *self.state.lock().await
    }

    /// Time left in the current window (zero if clear)
    pub async fn remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> chrono::Duration {
        let state = self.state.lock().await;
        let until = match (state.last_activation_at, chrono::Duration::from_std(cooldown)) {
            (Some(last), Ok(window)) => last.checked_add_signed(window),
            _ => None,
        };
        match until {
            Some(until) if now < until => until - now,
            _ => chrono::Duration::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_first_activation_acquires() {
        let gate = CooldownGate::new();
        assert_eq!(gate.try_acquire(t(0), FIVE_MIN).await, CooldownCheck::Acquired);
        assert_eq!(gate.state().await.last_activation_at, Some(t(0)));
    }

    #[tokio::test]
    async fn test_within_window_rejected() {
        let gate = CooldownGate::new();
        gate.try_acquire(t(0), FIVE_MIN).await;

        match gate.try_acquire(t(10), FIVE_MIN).await {
            CooldownCheck::Active { remaining } => assert_eq!(remaining.num_seconds(), 290),
            other => panic!("expected active cooldown, got {:?}", other),
        }
        // Rejection does not move the window
        assert_eq!(gate.state().await.last_activation_at, Some(t(0)));
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive_of_expiry() {
        let gate = CooldownGate::new();
        gate.try_acquire(t(0), FIVE_MIN).await;
        assert!(matches!(gate.try_acquire(t(299), FIVE_MIN).await, CooldownCheck::Active { .. }));
        assert_eq!(gate.try_acquire(t(300), FIVE_MIN).await, CooldownCheck::Acquired);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let gate = std::sync::Arc::new(CooldownGate::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.try_acquire(t(0), FIVE_MIN).await }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap() == CooldownCheck::Acquired {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn test_remaining() {
        let gate = CooldownGate::new();
        assert_eq!(gate.remaining(t(0), FIVE_MIN).await, chrono::Duration::zero());
        gate.try_acquire(t(0), FIVE_MIN).await;
        assert_eq!(gate.remaining(t(100), FIVE_MIN).await.num_seconds(), 200);
        assert_eq!(gate.remaining(t(400), FIVE_MIN).await, chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_unrepresentable_window_stays_closed() {
        let gate = CooldownGate::new();
        gate.try_acquire(t(0), FIVE_MIN).await;

        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(
            gate.try_acquire(t(86_400), huge).await,
            CooldownCheck::Active {
                remaining: chrono::TimeDelta::MAX
            }
        );
        assert_eq!(gate.state().await.last_activation_at, Some(t(0)));
    }
}
