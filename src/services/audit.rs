//! Append-only audit trail.
//!
//! Mutating services build their audit write with [`AuditService::append_op`]
//! and commit it inside the same transaction as the mutation itself, so a
//! failed transaction leaves the trail untouched. No update or delete
//! surface exists for audit entries.

use crate::domain::{AuditEntry, Collection};
use crate::infrastructure::store::{collections, DocumentStore, Guard, StoreError, WriteOp};
use std::sync::Arc;
use uuid::Uuid;

pub struct AuditService {
    store: Arc<dyn DocumentStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Build the write op appending `entry`. Entry ids are fresh UUIDs,
    /// so the insert guard can never collide with existing history.
    pub fn append_op(&self, entry: &AuditEntry) -> Result<WriteOp, StoreError> {
        WriteOp::put(
            collections::AUDIT_LOG,
            entry.id.to_string(),
            entry,
            Guard::MustNotExist,
        )
    }

    /// All entries for one target, oldest first.
    pub async fn for_target(
        &self,
        collection: Collection,
        target_id: Uuid,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .list(collections::AUDIT_LOG)
            .await?
            .iter()
            .map(|doc| doc.decode::<AuditEntry>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|e| e.collection == collection && e.target_id == target_id)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// The most recent `limit` entries across all targets, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .list(collections::AUDIT_LOG)
            .await?
            .iter()
            .map(|doc| doc.decode::<AuditEntry>())
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }
}
