//! Pending field changes awaiting review.

use super::record::{Collection, FieldValue};
use crate::shared::Actor;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Workflow state of a pending change.
///
/// `Pending` is the only non-terminal state. Once resolved, an entry is
/// immutable history and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
    Expired,
    /// Cascade outcome: the target record was soft-deleted while the
    /// change was still pending.
    Voided,
}

impl PendingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PendingStatus::Pending)
    }
}

/// A proposed single-field edit requiring reviewer approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,

    pub collection: Collection,
    pub target_id: Uuid,

    /// Denormalized from the target record for listing without a join.
    pub month: String,

    /// Column key being changed.
    pub field: String,

    /// Snapshot of the field at request time.
    pub base_value: FieldValue,

    /// Record version at request time. Approval applies against this
    /// unless the reviewer explicitly acknowledges a newer version.
    pub base_version: u64,

    pub new_value: FieldValue,

    pub requested_by: Actor,
    pub requested_at: DateTime<Utc>,

    pub status: PendingStatus,
    pub status_updated_at: DateTime<Utc>,

    /// Set when the entry is approved or rejected.
    pub reviewed_by: Option<Actor>,

    /// How many times a change for this target/field by this requester
    /// has been rejected. Drives the resubmission cooldown.
    pub rejection_count: u32,

    pub expires_at: DateTime<Utc>,
}

impl PendingChange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collection: Collection,
        target_id: Uuid,
        month: String,
        field: String,
        base_value: FieldValue,
        base_version: u64,
        new_value: FieldValue,
        requested_by: Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            target_id,
            month,
            field,
            base_value,
            base_version,
            new_value,
            requested_by,
            requested_at: now,
            status: PendingStatus::Pending,
            status_updated_at: now,
            reviewed_by: None,
            rejection_count: 0,
            expires_at: now + ttl,
        }
    }

    /// Expiry check. The boundary is inclusive: an entry whose
    /// `expires_at` equals `now` is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> PendingChange {
        PendingChange::new(
            Collection::Orders,
            Uuid::new_v4(),
            "2024-05".into(),
            "price".into(),
            FieldValue::Number(100.0),
            1,
            FieldValue::Number(110.0),
            Actor::new("u1", "User One"),
            now,
            Duration::days(7),
        )
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let pending = sample(now);
        assert!(!pending.is_expired(now + Duration::days(7) - Duration::seconds(1)));
        assert!(pending.is_expired(now + Duration::days(7)));
        assert!(pending.is_expired(now + Duration::days(8)));
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PendingStatus::Pending.is_terminal());
        for status in [
            PendingStatus::Approved,
            PendingStatus::Rejected,
            PendingStatus::Withdrawn,
            PendingStatus::Expired,
            PendingStatus::Voided,
        ] {
            assert!(status.is_terminal());
        }
    }
}
