//! Session state evaluated by the session policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A login session.
///
/// Validity is computed by [`crate::services::session::SessionPolicy`];
/// this struct only carries the facts the policy needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub remember_me: bool,
    /// Hard ceiling on session lifetime regardless of activity.
    pub absolute_expiry: DateTime<Utc>,
}
