//! Sliding-window rate limiter for authentication attempts.
//!
//! The guard never sees credentials; it only counts failures per
//! identity. Callers check the gate before handing credentials to the
//! external verifier, record failures, and clear the history on success.

use crate::shared::SharedClock;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("too many failed attempts, try again in {remaining_minutes} minutes")]
    RateLimited { remaining_minutes: i64 },
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The attempt may proceed. When `challenge_required` is set the
    /// caller must present a human-verification challenge first; this is
    /// a signal, not a block.
    Allowed { challenge_required: bool },
    /// Locked out until the window drains.
    Locked { remaining_minutes: i64 },
}

#[derive(Debug, Default)]
struct AttemptState {
    attempts: Vec<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

pub struct LoginGuard {
    clock: SharedClock,
    window: Duration,
    max_attempts: usize,
    challenge_threshold: usize,
    state: Mutex<HashMap<String, AttemptState>>,
}

impl LoginGuard {
    pub fn new(
        clock: SharedClock,
        window: Duration,
        max_attempts: usize,
        challenge_threshold: usize,
    ) -> Self {
        Self {
            clock,
            window,
            max_attempts,
            challenge_threshold,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate the gate for an identity, setting a lockout when the
    /// failure count inside the trailing window has reached the maximum.
    pub async fn check(&self, identity: &str) -> Gate {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state.entry(identity.to_string()).or_default();
        entry.attempts.retain(|t| *t > now - self.window);

        if let Some(locked_until) = entry.locked_until {
            if now < locked_until {
                return Gate::Locked {
                    remaining_minutes: remaining_minutes(locked_until, now),
                };
            }
            entry.locked_until = None;
        }

        if entry.attempts.len() >= self.max_attempts {
            let locked_until = now + self.window;
            entry.locked_until = Some(locked_until);
            warn!(identity, "login lockout engaged");
            return Gate::Locked {
                remaining_minutes: remaining_minutes(locked_until, now),
            };
        }

        Gate::Allowed {
            challenge_required: entry.attempts.len() >= self.challenge_threshold,
        }
    }

    /// Gate check that surfaces a lockout as an error. The challenge
    /// signal is returned on success.
    pub async fn ensure_allowed(&self, identity: &str) -> Result<bool, AuthError> {
        match self.check(identity).await {
            Gate::Allowed { challenge_required } => Ok(challenge_required),
            Gate::Locked { remaining_minutes } => {
                Err(AuthError::RateLimited { remaining_minutes })
            }
        }
    }

    /// Record a failed authentication attempt.
    pub async fn record_failure(&self, identity: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state.entry(identity.to_string()).or_default();
        entry.attempts.retain(|t| *t > now - self.window);
        entry.attempts.push(now);
    }

    /// Wipe attempt history on successful authentication.
    pub async fn clear(&self, identity: &str) {
        let mut state = self.state.lock().await;
        if state.remove(identity).is_some() {
            info!(identity, "login attempt history cleared");
        }
    }
}

fn remaining_minutes(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    // Round up so a caller never sees "0 minutes" while still locked.
    let seconds = (until - now).num_seconds().max(0);
    (seconds + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Clock, ManualClock};
    use std::sync::Arc;

    fn guard(clock: Arc<ManualClock>) -> LoginGuard {
        LoginGuard::new(clock, Duration::minutes(15), 5, 3)
    }

    #[tokio::test]
    async fn five_failures_lock_the_sixth_attempt() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = guard(clock.clone());

        for _ in 0..5 {
            assert!(matches!(guard.check("u1").await, Gate::Allowed { .. }));
            guard.record_failure("u1").await;
        }

        match guard.check("u1").await {
            Gate::Locked { remaining_minutes } => assert_eq!(remaining_minutes, 15),
            other => panic!("expected lockout, got {other:?}"),
        }

        // Window drains: allowed again.
        clock.advance(Duration::minutes(15));
        assert_eq!(
            guard.check("u1").await,
            Gate::Allowed {
                challenge_required: false
            }
        );
    }

    #[tokio::test]
    async fn challenge_signal_precedes_lockout() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = guard(clock.clone());

        for _ in 0..3 {
            guard.record_failure("u1").await;
        }
        assert_eq!(
            guard.check("u1").await,
            Gate::Allowed {
                challenge_required: true
            }
        );
    }

    #[tokio::test]
    async fn attempts_outside_the_window_are_pruned() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = guard(clock.clone());

        for _ in 0..4 {
            guard.record_failure("u1").await;
        }
        clock.advance(Duration::minutes(16));
        guard.record_failure("u1").await;
        // Only the fresh failure counts.
        assert_eq!(
            guard.check("u1").await,
            Gate::Allowed {
                challenge_required: false
            }
        );
    }

    #[tokio::test]
    async fn clear_resets_the_gate() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = guard(clock.clone());

        for _ in 0..5 {
            guard.record_failure("u1").await;
        }
        assert!(matches!(guard.check("u1").await, Gate::Locked { .. }));

        guard.clear("u1").await;
        assert_eq!(
            guard.check("u1").await,
            Gate::Allowed {
                challenge_required: false
            }
        );
    }

    #[tokio::test]
    async fn identities_are_tracked_independently() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let _ = clock.now();
        let guard = guard(clock);

        for _ in 0..5 {
            guard.record_failure("u1").await;
        }
        assert!(matches!(guard.check("u1").await, Gate::Locked { .. }));
        assert!(matches!(guard.check("u2").await, Gate::Allowed { .. }));
    }
}
