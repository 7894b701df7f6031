//! Versioned record store.
//!
//! Every field mutation reaches durable storage through one path:
//! [`RecordService::update_ops`] builds a guarded write that bumps the
//! version by exactly one, and the store's compare-and-set guard rejects
//! any writer whose expected version is stale. Direct edits and
//! workflow-approved edits both go through it.

use crate::domain::{
    AuditAction, AuditEntry, Collection, ColumnDefinition, FieldValue, Record, RecordStatus,
};
use crate::infrastructure::store::{
    DocumentStore, Guard, StoreError, Transaction, WriteOp,
};
use crate::services::audit::AuditService;
use crate::services::catalog::CatalogService;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::shared::{validate_month, Actor, SharedClock};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record not found")]
    NotFound,

    #[error("version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("record is completed and locked against mutation")]
    RecordLocked,

    #[error("forbidden")]
    Forbidden,

    #[error("record is not deleted")]
    NotDeleted,

    #[error("retention window has lapsed; the record can no longer be recovered")]
    RetentionExpired,

    #[error("retention window is still active; the record cannot be purged yet")]
    RetentionActive,

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Unavailable(#[from] StoreError),
}

pub struct RecordService {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    catalog: Arc<CatalogService>,
    audit: Arc<AuditService>,
    retry: RetryPolicy,
    retention: Duration,
}

impl RecordService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        catalog: Arc<CatalogService>,
        audit: Arc<AuditService>,
        retry: RetryPolicy,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            catalog,
            audit,
            retry,
            retention,
        }
    }

    /// Create a record. Creation never goes through the pending workflow.
    pub async fn create(
        &self,
        collection: Collection,
        month: String,
        dynamic_fields: BTreeMap<String, FieldValue>,
        order_id: Option<Uuid>,
        actor: Actor,
    ) -> Result<Record, RecordError> {
        validate_month(&month).map_err(RecordError::Validation)?;

        let columns = self.catalog.columns().await.map_err(catalog_unavailable)?;
        for (key, value) in &dynamic_fields {
            let column = lookup_dynamic_column(&columns, key)?;
            column
                .validate_value(value)
                .map_err(RecordError::Validation)?;
        }

        if let Some(order_id) = order_id {
            if collection != Collection::Costs {
                return Err(RecordError::Validation(
                    "only costs may link to an order".into(),
                ));
            }
            if self.fetch(Collection::Orders, order_id).await?.is_none() {
                return Err(RecordError::Validation(format!(
                    "linked order {order_id} does not exist"
                )));
            }
        }

        let now = self.clock.now();
        let record = Record::new(collection, month, dynamic_fields, order_id, actor.clone(), now);

        let entry = AuditEntry::new(
            actor,
            AuditAction::Create,
            collection,
            record.id,
            BTreeMap::from([("month".to_string(), record.month.clone())]),
            now,
        );
        let ops = vec![
            WriteOp::put(
                collection.as_str(),
                record.id.to_string(),
                &record,
                Guard::MustNotExist,
            )?,
            self.audit.append_op(&entry)?,
        ];
        self.commit(ops).await?;

        info!(collection = %collection, id = %record.id, "record created");
        Ok(record)
    }

    /// Fetch a record, soft-deleted or not. Deleted records stay
    /// addressable for recovery.
    pub async fn get(&self, collection: Collection, id: Uuid) -> Result<Record, RecordError> {
        self.fetch(collection, id).await?.ok_or(RecordError::NotFound)
    }

    /// Fetch a record for mutation: soft-deleted records are excluded
    /// from the active view and report `NotFound`.
    pub async fn get_active(&self, collection: Collection, id: Uuid) -> Result<Record, RecordError> {
        let record = self.get(collection, id).await?;
        if record.is_deleted() {
            return Err(RecordError::NotFound);
        }
        Ok(record)
    }

    /// List a collection. The active view excludes soft-deleted records.
    pub async fn list(
        &self,
        collection: Collection,
        include_deleted: bool,
    ) -> Result<Vec<Record>, RecordError> {
        let mut records: Vec<Record> = self
            .store
            .list(collection.as_str())
            .await?
            .iter()
            .map(|doc| doc.decode::<Record>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .collect();
        records.sort_by(|a, b| (&a.month, a.created_at).cmp(&(&b.month, b.created_at)));
        Ok(records)
    }

    /// Apply a single-field patch under optimistic concurrency.
    ///
    /// Fails with `VersionConflict` when `expected_version` is stale; the
    /// caller must re-fetch and retry, the engine never merges silently.
    pub async fn update_field(
        &self,
        collection: Collection,
        id: Uuid,
        field: &str,
        new_value: FieldValue,
        expected_version: u64,
        actor: Actor,
    ) -> Result<u64, RecordError> {
        let record = self.get_active(collection, id).await?;
        let columns = self.catalog.columns().await.map_err(catalog_unavailable)?;
        let now = self.clock.now();

        let (ops, updated) =
            self.update_ops(&record, &columns, field, new_value, expected_version, actor, now)?;

        match self.commit(ops).await {
            Ok(()) => {
                debug!(collection = %collection, %id, field, version = updated.version, "field updated");
                Ok(updated.version)
            }
            Err(RecordError::Unavailable(StoreError::GuardFailed { .. })) => {
                Err(self.conflict_for(collection, id, expected_version).await)
            }
            Err(e) => Err(e),
        }
    }

    /// Build the guarded write for a single-field patch, plus its audit
    /// entry. Shared by direct edits and workflow approval.
    pub(crate) fn update_ops(
        &self,
        record: &Record,
        columns: &[ColumnDefinition],
        field: &str,
        new_value: FieldValue,
        expected_version: u64,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(Vec<WriteOp>, Record), RecordError> {
        if record.status == RecordStatus::Completed {
            return Err(RecordError::RecordLocked);
        }
        if expected_version != record.version {
            return Err(RecordError::VersionConflict {
                expected: expected_version,
                actual: record.version,
            });
        }

        let mut updated = record.clone();
        if field == "status" {
            let next = match &new_value {
                FieldValue::Text(s) => RecordStatus::from_str(s)
                    .map_err(|_| RecordError::Validation(format!("unknown status {s:?}")))?,
                other => {
                    return Err(RecordError::Validation(format!(
                        "status expects a text value, got {other:?}"
                    )))
                }
            };
            updated.status = next;
        } else {
            let column = lookup_dynamic_column(columns, field)?;
            column
                .validate_value(&new_value)
                .map_err(RecordError::Validation)?;
            updated.dynamic_fields.insert(field.to_string(), new_value.clone());
        }
        updated.version = expected_version + 1;
        updated.updated_at = now;

        let entry = AuditEntry::new(
            actor,
            AuditAction::Update,
            record.collection,
            record.id,
            BTreeMap::from([
                ("field".to_string(), field.to_string()),
                ("new_value".to_string(), new_value.summary()),
                ("version".to_string(), updated.version.to_string()),
            ]),
            now,
        );
        let ops = vec![
            WriteOp::put(
                record.collection.as_str(),
                record.id.to_string(),
                &updated,
                Guard::RevisionIs(expected_version),
            )?,
            self.audit.append_op(&entry)?,
        ];
        Ok((ops, updated))
    }

    /// Build the soft-delete write plus its audit entry.
    ///
    /// Callers must commit these together with the workflow's void ops
    /// for the same target; the pairing is mandatory so no approval can
    /// later apply to a vanished record.
    pub(crate) fn soft_delete_ops(
        &self,
        record: &Record,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(Vec<WriteOp>, Record), RecordError> {
        if record.is_deleted() {
            return Err(RecordError::NotFound);
        }
        let mut updated = record.clone();
        updated.deleted_at = Some(now);
        updated.deleted_by = Some(actor.clone());
        updated.version += 1;
        updated.updated_at = now;

        let entry = AuditEntry::new(
            actor,
            AuditAction::Delete,
            record.collection,
            record.id,
            BTreeMap::new(),
            now,
        );
        let ops = vec![
            WriteOp::put(
                record.collection.as_str(),
                record.id.to_string(),
                &updated,
                Guard::RevisionIs(record.version),
            )?,
            self.audit.append_op(&entry)?,
        ];
        Ok((ops, updated))
    }

    /// Clear the soft-delete markers within the retention window.
    pub async fn recover(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Actor,
    ) -> Result<u64, RecordError> {
        let record = self.get(collection, id).await?;
        let deleted_at = record.deleted_at.ok_or(RecordError::NotDeleted)?;
        let now = self.clock.now();
        if now > deleted_at + self.retention {
            return Err(RecordError::RetentionExpired);
        }

        let mut updated = record.clone();
        updated.deleted_at = None;
        updated.deleted_by = None;
        updated.version += 1;
        updated.updated_at = now;

        let entry = AuditEntry::new(
            actor,
            AuditAction::Recover,
            collection,
            id,
            BTreeMap::new(),
            now,
        );
        let ops = vec![
            WriteOp::put(
                collection.as_str(),
                id.to_string(),
                &updated,
                Guard::RevisionIs(record.version),
            )?,
            self.audit.append_op(&entry)?,
        ];
        match self.commit(ops).await {
            Ok(()) => {
                info!(collection = %collection, %id, "record recovered");
                Ok(updated.version)
            }
            Err(RecordError::Unavailable(StoreError::GuardFailed { .. })) => {
                Err(self.conflict_for(collection, id, record.version).await)
            }
            Err(e) => Err(e),
        }
    }

    /// Permanently remove a soft-deleted record past retention.
    /// Irreversible.
    pub async fn purge(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Actor,
    ) -> Result<(), RecordError> {
        let record = self.get(collection, id).await?;
        let deleted_at = record.deleted_at.ok_or(RecordError::NotDeleted)?;
        let now = self.clock.now();
        if now <= deleted_at + self.retention {
            return Err(RecordError::RetentionActive);
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::PermanentDelete,
            collection,
            id,
            BTreeMap::from([("month".to_string(), record.month.clone())]),
            now,
        );
        let ops = vec![
            WriteOp::delete(
                collection.as_str(),
                id.to_string(),
                Guard::RevisionIs(record.version),
            ),
            self.audit.append_op(&entry)?,
        ];
        self.commit(ops).await?;
        info!(collection = %collection, %id, "record purged");
        Ok(())
    }

    /// Soft-deleted records whose retention window has lapsed.
    pub async fn purge_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Collection, Uuid)>, RecordError> {
        let mut eligible = Vec::new();
        for collection in [Collection::Orders, Collection::Costs] {
            for record in self.list(collection, true).await? {
                if let Some(deleted_at) = record.deleted_at {
                    if now > deleted_at + self.retention {
                        eligible.push((collection, record.id));
                    }
                }
            }
        }
        Ok(eligible)
    }

    /// Commit ops with bounded retry on transient failures.
    pub(crate) async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), RecordError> {
        with_retry(self.retry, || {
            self.store.commit(Transaction::new(ops.clone()))
        })
        .await?;
        Ok(())
    }

    /// Translate a lost compare-and-set race into an accurate
    /// `VersionConflict` by re-reading the live record.
    async fn conflict_for(
        &self,
        collection: Collection,
        id: Uuid,
        expected: u64,
    ) -> RecordError {
        match self.fetch(collection, id).await {
            Ok(Some(record)) => RecordError::VersionConflict {
                expected,
                actual: record.version,
            },
            Ok(None) => RecordError::NotFound,
            Err(e) => e,
        }
    }

    async fn fetch(
        &self,
        collection: Collection,
        id: Uuid,
    ) -> Result<Option<Record>, RecordError> {
        match self.store.get(collection.as_str(), &id.to_string()).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

fn lookup_dynamic_column<'a>(
    columns: &'a [ColumnDefinition],
    key: &str,
) -> Result<&'a ColumnDefinition, RecordError> {
    let column = columns
        .iter()
        .find(|c| c.key == key)
        .ok_or_else(|| RecordError::Validation(format!("unknown column {key:?}")))?;
    if column.system_field {
        return Err(RecordError::Validation(format!(
            "column {key:?} is system-managed and cannot be patched as a dynamic field"
        )));
    }
    Ok(column)
}

fn catalog_unavailable(e: crate::services::catalog::CatalogError) -> RecordError {
    use crate::services::catalog::CatalogError;
    match e {
        CatalogError::Unavailable(inner) => RecordError::Unavailable(inner),
        other => RecordError::Validation(other.to_string()),
    }
}
