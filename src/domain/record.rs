//! Versioned records: orders and costs.

use crate::shared::Actor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;

/// The two record collections the engine manages.
///
/// Orders and costs are structurally identical; a cost may additionally
/// link back to the order it belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Orders,
    Costs,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Costs => "costs",
        }
    }
}

/// Lifecycle status of a record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Completed,
    Cancelled,
}

/// A dynamic-field value.
///
/// Serialized untagged so documents read as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render for audit details. Long values are truncated so the audit
    /// log never stores unbounded payloads.
    pub fn summary(&self) -> String {
        const MAX: usize = 120;
        let rendered = match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        };
        if rendered.chars().count() > MAX {
            let truncated: String = rendered.chars().take(MAX).collect();
            format!("{truncated}…")
        } else {
            rendered
        }
    }
}

/// A versioned, soft-deletable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,

    pub collection: Collection,

    /// Accounting month, `YYYY-MM`.
    pub month: String,

    pub status: RecordStatus,

    /// Monotonically increasing, starts at 1. Every write that changes
    /// `dynamic_fields` or `status` bumps this by exactly one.
    pub version: u64,

    pub created_by: Actor,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete markers. A deleted record is excluded from active
    /// views but stays addressable for recovery within the retention
    /// window.
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Actor>,

    /// For costs: the order this cost belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,

    /// Open map from column key to value.
    #[serde(default)]
    pub dynamic_fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(
        collection: Collection,
        month: String,
        dynamic_fields: BTreeMap<String, FieldValue>,
        order_id: Option<Uuid>,
        created_by: Actor,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            month,
            status: RecordStatus::Active,
            version: 1,
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            order_id,
            dynamic_fields,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Current value of a dynamic field, `Null` when unset.
    pub fn field(&self, key: &str) -> FieldValue {
        self.dynamic_fields
            .get(key)
            .cloned()
            .unwrap_or(FieldValue::Null)
    }
}
