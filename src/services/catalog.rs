//! Column catalog and role-permission administration.
//!
//! Catalog writes are rare, gated to super admins, and applied as atomic
//! single-document guarded updates so concurrent metadata edits cannot
//! clobber each other.

use crate::domain::{
    ColumnDefinition, ColumnType, Record, Role, RolePermission,
};
use crate::infrastructure::store::{
    collections, DocumentStore, Guard, StoreError, Transaction, WriteOp,
};
use crate::services::permissions::PermissionSnapshot;
use crate::services::retry::{with_retry, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("operation requires the super_admin role")]
    Forbidden,

    #[error("column not found: {0}")]
    NotFound(String),

    #[error("column {0} is a system field and cannot be deleted")]
    SystemField(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Unavailable(#[from] StoreError),
}

/// Partial update for an existing column.
#[derive(Debug, Clone, Default)]
pub struct ColumnUpdate {
    pub label: Option<String>,
    pub display_order: Option<i32>,
    pub options: Option<Vec<String>>,
    pub column_type: Option<ColumnType>,
}

pub struct CatalogService {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl CatalogService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Seed the system columns and an empty permission table per role.
    /// Idempotent: existing documents are left alone.
    pub async fn ensure_defaults(&self) -> Result<(), CatalogError> {
        for column in ColumnDefinition::system_columns() {
            let op = WriteOp::put(
                collections::COLUMNS,
                column.key.clone(),
                &column,
                Guard::MustNotExist,
            )?;
            match self.commit_one(op).await {
                Ok(()) | Err(StoreError::GuardFailed { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for role in Role::ALL {
            let table = RolePermission::empty(role);
            let op = WriteOp::put(
                collections::ROLE_PERMISSIONS,
                role.to_string(),
                &table,
                Guard::MustNotExist,
            )?;
            match self.commit_one(op).await {
                Ok(()) | Err(StoreError::GuardFailed { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// The full column catalog, in display order.
    pub async fn columns(&self) -> Result<Vec<ColumnDefinition>, CatalogError> {
        let mut columns: Vec<ColumnDefinition> = self
            .store
            .list(collections::COLUMNS)
            .await?
            .iter()
            .map(|doc| doc.decode::<ColumnDefinition>())
            .collect::<Result<Vec<_>, _>>()?;
        columns.sort_by_key(|c| c.display_order);
        Ok(columns)
    }

    /// The permission table for one role.
    pub async fn role_permissions(&self, role: Role) -> Result<RolePermission, CatalogError> {
        match self
            .store
            .get(collections::ROLE_PERMISSIONS, &role.to_string())
            .await?
        {
            Some(doc) => Ok(doc.decode()?),
            None => Ok(RolePermission::empty(role)),
        }
    }

    /// Point-in-time view of columns plus all role permission tables.
    pub async fn snapshot(&self) -> Result<PermissionSnapshot, CatalogError> {
        let columns = self.columns().await?;
        let permissions = self
            .store
            .list(collections::ROLE_PERMISSIONS)
            .await?
            .iter()
            .map(|doc| doc.decode::<RolePermission>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PermissionSnapshot::new(columns, permissions))
    }

    /// Add a column to the catalog.
    pub async fn create_column(
        &self,
        actor_role: Role,
        column: ColumnDefinition,
    ) -> Result<(), CatalogError> {
        if !actor_role.is_super_admin() {
            return Err(CatalogError::Forbidden);
        }
        validate_definition(&column)?;

        let op = WriteOp::put(
            collections::COLUMNS,
            column.key.clone(),
            &column,
            Guard::MustNotExist,
        )?;
        match self.commit_one(op).await {
            Ok(()) => {
                info!(key = %column.key, "column created");
                Ok(())
            }
            Err(StoreError::GuardFailed { .. }) => Err(CatalogError::Validation(format!(
                "column key {:?} already exists",
                column.key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Update an existing column in place.
    ///
    /// A type change is refused once any record holds a non-null value
    /// for a data-related column.
    pub async fn update_column(
        &self,
        actor_role: Role,
        key: &str,
        update: ColumnUpdate,
    ) -> Result<ColumnDefinition, CatalogError> {
        if !actor_role.is_super_admin() {
            return Err(CatalogError::Forbidden);
        }

        let doc = self
            .store
            .get(collections::COLUMNS, key)
            .await?
            .ok_or_else(|| CatalogError::NotFound(key.to_string()))?;
        let mut column: ColumnDefinition = doc.decode()?;

        if let Some(new_type) = update.column_type {
            if new_type != column.column_type
                && column.is_data_related
                && self.column_holds_data(key).await?
            {
                return Err(CatalogError::Validation(format!(
                    "column {key:?} holds record data; its type can no longer change"
                )));
            }
            column.column_type = new_type;
        }
        if let Some(label) = update.label {
            column.label = label;
        }
        if let Some(order) = update.display_order {
            column.display_order = order;
        }
        if let Some(options) = update.options {
            column.options = options;
        }
        validate_definition(&column)?;

        let op = WriteOp::put(
            collections::COLUMNS,
            key,
            &column,
            Guard::RevisionIs(doc.revision),
        )?;
        match self.commit_one(op).await {
            Ok(()) => Ok(column),
            Err(StoreError::GuardFailed { .. }) => Err(CatalogError::Validation(format!(
                "column {key:?} changed concurrently, re-fetch and retry"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a non-system column from the catalog.
    pub async fn delete_column(&self, actor_role: Role, key: &str) -> Result<(), CatalogError> {
        if !actor_role.is_super_admin() {
            return Err(CatalogError::Forbidden);
        }
        let doc = self
            .store
            .get(collections::COLUMNS, key)
            .await?
            .ok_or_else(|| CatalogError::NotFound(key.to_string()))?;
        let column: ColumnDefinition = doc.decode()?;
        if column.system_field {
            return Err(CatalogError::SystemField(key.to_string()));
        }

        let op = WriteOp::delete(collections::COLUMNS, key, Guard::RevisionIs(doc.revision));
        match self.commit_one(op).await {
            Ok(()) => {
                info!(key, "column deleted");
                Ok(())
            }
            Err(StoreError::GuardFailed { .. }) => Err(CatalogError::Validation(format!(
                "column {key:?} changed concurrently, re-fetch and retry"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the permission table for one role.
    pub async fn set_role_permissions(
        &self,
        actor_role: Role,
        table: RolePermission,
    ) -> Result<(), CatalogError> {
        if !actor_role.is_super_admin() {
            return Err(CatalogError::Forbidden);
        }
        let op = WriteOp::put(
            collections::ROLE_PERMISSIONS,
            table.role.to_string(),
            &table,
            Guard::Any,
        )?;
        self.commit_one(op).await?;
        info!(role = %table.role, "role permissions updated");
        Ok(())
    }

    /// Whether any record (including soft-deleted ones) holds a non-null
    /// value for `key`.
    async fn column_holds_data(&self, key: &str) -> Result<bool, StoreError> {
        for collection in [collections::ORDERS, collections::COSTS] {
            for doc in self.store.list(collection).await? {
                let record: Record = doc.decode()?;
                if !record.field(key).is_null() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn commit_one(&self, op: WriteOp) -> Result<(), StoreError> {
        with_retry(self.retry, || {
            self.store.commit(Transaction::new(vec![op.clone()]))
        })
        .await
    }
}

fn validate_definition(column: &ColumnDefinition) -> Result<(), CatalogError> {
    if column.key.is_empty()
        || !column
            .key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(CatalogError::Validation(format!(
            "column key must be a lowercase identifier, got {:?}",
            column.key
        )));
    }
    if column.column_type == ColumnType::Select && column.options.is_empty() {
        return Err(CatalogError::Validation(format!(
            "select column {:?} needs at least one option",
            column.key
        )));
    }
    Ok(())
}
