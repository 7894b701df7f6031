//! Session lifetime policy.
//!
//! Expiry is binary: the policy never extends or renews a session. An
//! invalid session forces the caller back through authentication.

use crate::domain::SessionInfo;
use crate::shared::SharedClock;
use chrono::{DateTime, Duration, Utc};

pub struct SessionPolicy {
    clock: SharedClock,
    idle_timeout: Duration,
    absolute: Duration,
    remember_me: Duration,
}

impl SessionPolicy {
    pub fn new(
        clock: SharedClock,
        idle_timeout: Duration,
        absolute: Duration,
        remember_me: Duration,
    ) -> Self {
        Self {
            clock,
            idle_timeout,
            absolute,
            remember_me,
        }
    }

    /// Open a session. Remember-me sessions get the long absolute expiry
    /// and are exempt from the idle timeout.
    pub fn start(&self, remember_me: bool) -> SessionInfo {
        let now = self.clock.now();
        let lifetime = if remember_me {
            self.remember_me
        } else {
            self.absolute
        };
        SessionInfo {
            created_at: now,
            last_activity: now,
            remember_me,
            absolute_expiry: now + lifetime,
        }
    }

    /// Record activity on the session.
    pub fn touch(&self, session: &mut SessionInfo) {
        session.last_activity = self.clock.now();
    }

    /// Session validity at a given instant.
    pub fn is_valid(&self, session: &SessionInfo, now: DateTime<Utc>) -> bool {
        if now > session.absolute_expiry {
            return false;
        }
        if !session.remember_me && now - session.last_activity > self.idle_timeout {
            return false;
        }
        true
    }

    /// Session validity against the policy's own clock.
    pub fn is_valid_now(&self, session: &SessionInfo) -> bool {
        self.is_valid(session, self.clock.now())
    }
}
