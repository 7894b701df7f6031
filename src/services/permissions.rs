//! Field-level permission resolution.
//!
//! A [`PermissionSnapshot`] is a point-in-time read of the column catalog
//! and role-permission tables; all predicates on it are pure. Absent
//! entries resolve to all-false: a role sees and edits nothing it was not
//! explicitly granted.

use crate::domain::{
    Collection, ColumnDefinition, ColumnPermission, Role, RolePermission,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct PermissionSnapshot {
    columns: BTreeMap<String, ColumnDefinition>,
    permissions: BTreeMap<Role, RolePermission>,
}

impl PermissionSnapshot {
    pub fn new(columns: Vec<ColumnDefinition>, permissions: Vec<RolePermission>) -> Self {
        Self {
            columns: columns.into_iter().map(|c| (c.key.clone(), c)).collect(),
            permissions: permissions.into_iter().map(|p| (p.role, p)).collect(),
        }
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDefinition> {
        self.columns.get(key)
    }

    fn entry(&self, role: Role, column_key: &str) -> ColumnPermission {
        self.permissions
            .get(&role)
            .and_then(|table| table.permissions.get(column_key))
            .copied()
            .unwrap_or_default()
    }

    pub fn visible(&self, role: Role, column_key: &str) -> bool {
        self.entry(role, column_key).visible
    }

    pub fn editable(&self, role: Role, column_key: &str) -> bool {
        self.entry(role, column_key).editable
    }

    pub fn requires_approval(&self, role: Role, column_key: &str) -> bool {
        self.entry(role, column_key).requires_approval
    }

    /// Whether the role may touch the field at all, directly or through
    /// the approval workflow.
    pub fn may_change(&self, role: Role, column_key: &str) -> bool {
        let entry = self.entry(role, column_key);
        entry.editable || entry.requires_approval
    }

    /// Collection-level gate, evaluated before any column-level check.
    /// The cost collection is restricted to managers and super admins
    /// regardless of per-column settings.
    pub fn can_access_collection(&self, role: Role, collection: Collection) -> bool {
        match collection {
            Collection::Orders => true,
            Collection::Costs => matches!(role, Role::Manager | Role::SuperAdmin),
        }
    }

    /// Dynamic-field columns visible to `role`, in display order. System
    /// columns (id/month/status) are never part of the dynamic listing.
    pub fn visible_columns(&self, role: Role) -> Vec<&ColumnDefinition> {
        self.filtered_columns(|key| self.visible(role, key))
    }

    /// Dynamic-field columns editable by `role`, in display order.
    pub fn editable_columns(&self, role: Role) -> Vec<&ColumnDefinition> {
        self.filtered_columns(|key| self.editable(role, key))
    }

    fn filtered_columns<F: Fn(&str) -> bool>(&self, keep: F) -> Vec<&ColumnDefinition> {
        let mut columns: Vec<&ColumnDefinition> = self
            .columns
            .values()
            .filter(|c| !c.system_field && keep(&c.key))
            .collect();
        columns.sort_by_key(|c| c.display_order);
        columns
    }

    pub fn all_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.values()
    }
}
