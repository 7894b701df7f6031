//! Column catalog and per-role permission tables.

use super::record::FieldValue;
use super::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Column keys that are part of every record and never user-defined.
pub const SYSTEM_COLUMN_KEYS: [&str; 3] = ["id", "month", "status"];

/// The value type a column holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Select,
}

/// A column in the dynamic-field catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Stable unique identifier, used as the key in `dynamic_fields`.
    pub key: String,

    /// Human-readable label.
    pub label: String,

    pub column_type: ColumnType,

    /// Position in column listings.
    pub display_order: i32,

    /// Allowed values for `Select` columns; empty otherwise.
    #[serde(default)]
    pub options: Vec<String>,

    /// Built-in column (id/month/status). Never deletable.
    #[serde(default)]
    pub system_field: bool,

    /// Once any record holds a non-null value for this column, its type
    /// can no longer be changed.
    #[serde(default)]
    pub is_data_related: bool,
}

impl ColumnDefinition {
    pub fn new(key: impl Into<String>, label: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            column_type,
            display_order: 0,
            options: Vec::new(),
            system_field: false,
            is_data_related: true,
        }
    }

    /// The built-in columns seeded into every catalog.
    pub fn system_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition {
                key: "id".into(),
                label: "ID".into(),
                column_type: ColumnType::Text,
                display_order: 0,
                options: Vec::new(),
                system_field: true,
                is_data_related: false,
            },
            ColumnDefinition {
                key: "month".into(),
                label: "Month".into(),
                column_type: ColumnType::Date,
                display_order: 1,
                options: Vec::new(),
                system_field: true,
                is_data_related: false,
            },
            ColumnDefinition {
                key: "status".into(),
                label: "Status".into(),
                column_type: ColumnType::Select,
                display_order: 2,
                options: vec!["active".into(), "completed".into(), "cancelled".into()],
                system_field: true,
                is_data_related: false,
            },
        ]
    }

    /// Check that `value` is acceptable for this column.
    pub fn validate_value(&self, value: &FieldValue) -> Result<(), String> {
        if matches!(value, FieldValue::Null) {
            return Ok(());
        }
        match (self.column_type, value) {
            (ColumnType::Text, FieldValue::Text(_)) => Ok(()),
            (ColumnType::Number, FieldValue::Number(_)) => Ok(()),
            (ColumnType::Date, FieldValue::Text(s)) => {
                if is_iso_date(s) {
                    Ok(())
                } else {
                    Err(format!(
                        "column {:?} expects an ISO date (YYYY-MM-DD), got {s:?}",
                        self.key
                    ))
                }
            }
            (ColumnType::Select, FieldValue::Text(s)) => {
                if self.options.iter().any(|o| o == s) {
                    Ok(())
                } else {
                    Err(format!(
                        "{s:?} is not one of the options for column {:?}",
                        self.key
                    ))
                }
            }
            (expected, actual) => Err(format!(
                "column {:?} expects a {expected} value, got {actual:?}",
                self.key
            )),
        }
    }
}

fn is_iso_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Permission flags for one role on one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnPermission {
    pub visible: bool,
    pub editable: bool,
    pub requires_approval: bool,
}

impl ColumnPermission {
    pub fn full() -> Self {
        Self {
            visible: true,
            editable: true,
            requires_approval: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            visible: true,
            editable: false,
            requires_approval: false,
        }
    }

    pub fn approval_required() -> Self {
        Self {
            visible: true,
            editable: false,
            requires_approval: true,
        }
    }
}

/// Per-role permission table: column key -> flags.
///
/// A column key absent from `permissions` is invisible and non-editable
/// for the role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: Role,
    #[serde(default)]
    pub permissions: BTreeMap<String, ColumnPermission>,
}

impl RolePermission {
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            permissions: BTreeMap::new(),
        }
    }
}
