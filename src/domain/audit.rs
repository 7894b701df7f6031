//! Append-only audit trail entries.

use super::record::Collection;
use crate::shared::Actor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;

/// The auditable actions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Withdraw,
    Recover,
    PermanentDelete,
}

/// One immutable audit record. The audit service exposes append and read
/// only; there is no update or delete surface for this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: Actor,
    pub action: AuditAction,
    pub collection: Collection,
    pub target_id: Uuid,
    /// Short, already-redacted key/value details. Values are summaries,
    /// never raw sensitive payloads.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: Actor,
        action: AuditAction,
        collection: Collection,
        target_id: Uuid,
        details: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            action,
            collection,
            target_id,
            details,
            timestamp: now,
        }
    }
}
