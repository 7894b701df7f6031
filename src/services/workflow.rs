//! Pending-change approval workflow.
//!
//! State machine: `Pending -> {Approved, Rejected, Withdrawn, Expired,
//! Voided}`, all terminal. Resolution of a terminal entry is refused with
//! `NotPending`, which also makes retried calls idempotent-on-failure: a
//! second `approve` on an already-approved entry cannot double-apply.
//!
//! Uniqueness of live proposals per (target, field) is enforced with an
//! index document inserted `MustNotExist` in the same transaction as the
//! pending entry, so two concurrent proposals cannot slip past a naive
//! read-then-write check.

use crate::domain::{
    AuditAction, AuditEntry, Collection, FieldValue, PendingChange, PendingStatus, Role,
};
use crate::infrastructure::store::{
    collections, DocumentStore, Guard, StoreError, Transaction, WriteOp,
};
use crate::services::audit::AuditService;
use crate::services::catalog::{CatalogError, CatalogService};
use crate::services::records::{RecordError, RecordService};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::shared::{Actor, SharedClock};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("forbidden")]
    Forbidden,

    #[error("pending change not found")]
    NotFound,

    #[error("a pending change for this field already exists")]
    DuplicatePending,

    #[error("record moved to version {current_version} since the change was proposed")]
    StaleBase { current_version: u64 },

    #[error("pending change is already resolved")]
    NotPending,

    #[error("pending change has expired")]
    Expired,

    #[error("rejected change may be re-proposed in {remaining_minutes} minutes")]
    CooldownActive { remaining_minutes: i64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Unavailable(#[from] StoreError),
}

pub struct WorkflowService {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    catalog: Arc<CatalogService>,
    records: Arc<RecordService>,
    audit: Arc<AuditService>,
    retry: RetryPolicy,
    pending_ttl: Duration,
    rejection_cooldown: Duration,
}

impl WorkflowService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        catalog: Arc<CatalogService>,
        records: Arc<RecordService>,
        audit: Arc<AuditService>,
        retry: RetryPolicy,
        pending_ttl: Duration,
        rejection_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            catalog,
            records,
            audit,
            retry,
            pending_ttl,
            rejection_cooldown,
        }
    }

    /// Propose a field edit for review.
    pub async fn propose(
        &self,
        collection: Collection,
        target_id: Uuid,
        field: &str,
        new_value: FieldValue,
        requester: Actor,
        requester_role: Role,
    ) -> Result<PendingChange, WorkflowError> {
        let snapshot = self.catalog.snapshot().await.map_err(catalog_err)?;
        if !snapshot.can_access_collection(requester_role, collection) {
            return Err(WorkflowError::Forbidden);
        }
        if !snapshot.may_change(requester_role, field) {
            return Err(WorkflowError::Forbidden);
        }
        let column = snapshot
            .column(field)
            .ok_or_else(|| WorkflowError::Validation(format!("unknown column {field:?}")))?;
        column
            .validate_value(&new_value)
            .map_err(WorkflowError::Validation)?;

        let record = self.records.get_active(collection, target_id).await?;
        let now = self.clock.now();
        self.check_cooldown(collection, target_id, field, &requester, now)
            .await?;

        let pending = PendingChange::new(
            collection,
            target_id,
            record.month.clone(),
            field.to_string(),
            record.field(field),
            record.version,
            new_value,
            requester,
            now,
            self.pending_ttl,
        );

        let ops = vec![
            WriteOp::put(
                collections::PENDING_CHANGES,
                pending.id.to_string(),
                &pending,
                Guard::MustNotExist,
            )?,
            WriteOp::put(
                collections::PENDING_INDEX,
                index_id(collection, target_id, field),
                &serde_json::json!({ "pending_id": pending.id }),
                Guard::MustNotExist,
            )?,
        ];
        match self.commit(ops).await {
            Ok(()) => {
                info!(id = %pending.id, collection = %collection, %target_id, field, "change proposed");
                Ok(pending)
            }
            Err(StoreError::GuardFailed { .. }) => Err(WorkflowError::DuplicatePending),
            Err(e) => Err(e.into()),
        }
    }

    /// Approve a pending change and apply it to the record.
    ///
    /// If the record has moved past the proposal's base version the call
    /// fails with `StaleBase` unless the reviewer passes the current
    /// version back as `acknowledged_version`, confirming they reviewed
    /// the live value.
    pub async fn approve(
        &self,
        pending_id: Uuid,
        reviewer: Actor,
        reviewer_role: Role,
        acknowledged_version: Option<u64>,
    ) -> Result<u64, WorkflowError> {
        if !reviewer_role.can_review() {
            return Err(WorkflowError::Forbidden);
        }
        let (pending, revision) = self.load(pending_id).await?;
        if pending.status.is_terminal() {
            return Err(WorkflowError::NotPending);
        }

        let now = self.clock.now();
        if pending.is_expired(now) {
            self.transition(&pending, revision, PendingStatus::Expired, None, now)
                .await?;
            return Err(WorkflowError::Expired);
        }

        let record = self
            .records
            .get_active(pending.collection, pending.target_id)
            .await?;
        let expected = if record.version == pending.base_version {
            pending.base_version
        } else {
            match acknowledged_version {
                Some(v) if v == record.version => record.version,
                _ => {
                    return Err(WorkflowError::StaleBase {
                        current_version: record.version,
                    })
                }
            }
        };

        let columns = self.catalog.columns().await.map_err(catalog_err)?;
        let (mut ops, updated) = self.records.update_ops(
            &record,
            &columns,
            &pending.field,
            pending.new_value.clone(),
            expected,
            reviewer.clone(),
            now,
        )?;

        let mut resolved = pending.clone();
        resolved.status = PendingStatus::Approved;
        resolved.reviewed_by = Some(reviewer.clone());
        resolved.status_updated_at = now;
        ops.push(WriteOp::put(
            collections::PENDING_CHANGES,
            resolved.id.to_string(),
            &resolved,
            Guard::RevisionIs(revision),
        )?);
        ops.push(WriteOp::delete(
            collections::PENDING_INDEX,
            index_id(pending.collection, pending.target_id, &pending.field),
            Guard::Any,
        ));

        let entry = AuditEntry::new(
            reviewer,
            AuditAction::Approve,
            pending.collection,
            pending.target_id,
            BTreeMap::from([
                ("pending_id".to_string(), pending.id.to_string()),
                ("field".to_string(), pending.field.clone()),
                ("version".to_string(), updated.version.to_string()),
            ]),
            now,
        );
        ops.push(self.audit.append_op(&entry)?);

        match self.commit(ops).await {
            Ok(()) => {
                info!(id = %pending.id, version = updated.version, "pending change approved");
                Ok(updated.version)
            }
            Err(StoreError::GuardFailed { collection, .. })
                if collection == collections::PENDING_CHANGES =>
            {
                // Lost a race against another resolution of the same entry.
                Err(WorkflowError::NotPending)
            }
            Err(StoreError::GuardFailed { .. }) => {
                // The record moved between our read and the commit.
                let current = self
                    .records
                    .get_active(pending.collection, pending.target_id)
                    .await?;
                Err(WorkflowError::StaleBase {
                    current_version: current.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reject a pending change. The record is left untouched.
    pub async fn reject(
        &self,
        pending_id: Uuid,
        reviewer: Actor,
        reviewer_role: Role,
    ) -> Result<(), WorkflowError> {
        if !reviewer_role.can_review() {
            return Err(WorkflowError::Forbidden);
        }
        let (pending, revision) = self.load(pending_id).await?;
        if pending.status.is_terminal() {
            return Err(WorkflowError::NotPending);
        }

        let now = self.clock.now();
        let entry = AuditEntry::new(
            reviewer.clone(),
            AuditAction::Reject,
            pending.collection,
            pending.target_id,
            BTreeMap::from([
                ("pending_id".to_string(), pending.id.to_string()),
                ("field".to_string(), pending.field.clone()),
            ]),
            now,
        );
        let audit_op = self.audit.append_op(&entry)?;
        self.transition_with(
            &pending,
            revision,
            PendingStatus::Rejected,
            Some(reviewer),
            now,
            vec![audit_op],
        )
        .await?;
        info!(id = %pending.id, "pending change rejected");
        Ok(())
    }

    /// Withdraw a pending change. Only the original requester may do so.
    pub async fn withdraw(&self, pending_id: Uuid, requester: Actor) -> Result<(), WorkflowError> {
        let (pending, revision) = self.load(pending_id).await?;
        if requester.id != pending.requested_by.id {
            return Err(WorkflowError::Forbidden);
        }
        if pending.status.is_terminal() {
            return Err(WorkflowError::NotPending);
        }

        let now = self.clock.now();
        let entry = AuditEntry::new(
            requester,
            AuditAction::Withdraw,
            pending.collection,
            pending.target_id,
            BTreeMap::from([
                ("pending_id".to_string(), pending.id.to_string()),
                ("field".to_string(), pending.field.clone()),
            ]),
            now,
        );
        let audit_op = self.audit.append_op(&entry)?;
        self.transition_with(
            &pending,
            revision,
            PendingStatus::Withdrawn,
            None,
            now,
            vec![audit_op],
        )
        .await?;
        info!(id = %pending.id, "pending change withdrawn");
        Ok(())
    }

    /// Transition every pending entry whose expiry has passed (boundary
    /// inclusive) to `Expired`. Idempotent and safe under overlapping
    /// invocations: entries already resolved by a concurrent sweep are
    /// skipped.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<usize, WorkflowError> {
        let mut expired = 0;
        for doc in self.store.list(collections::PENDING_CHANGES).await? {
            let pending: PendingChange = doc.decode()?;
            if pending.status != PendingStatus::Pending || !pending.is_expired(now) {
                continue;
            }
            match self
                .transition(&pending, doc.revision, PendingStatus::Expired, None, now)
                .await
            {
                Ok(()) => expired += 1,
                Err(WorkflowError::NotPending) => {} // resolved concurrently
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            debug!(expired, "expiry sweep transitioned pending changes");
        }
        Ok(expired)
    }

    /// Soft-delete a record and void every pending change targeting it in
    /// the same transaction, so no approval can later apply to the
    /// vanished record.
    pub async fn cascade_soft_delete(
        &self,
        collection: Collection,
        target_id: Uuid,
        actor: Actor,
    ) -> Result<u64, WorkflowError> {
        let record = self.records.get(collection, target_id).await?;
        let now = self.clock.now();

        let (mut ops, updated) = self.records.soft_delete_ops(&record, actor, now)?;
        ops.extend(self.void_ops_for_target(collection, target_id, now).await?);

        match self.commit(ops).await {
            Ok(()) => {
                info!(collection = %collection, %target_id, "record soft-deleted, pending changes voided");
                Ok(updated.version)
            }
            Err(StoreError::GuardFailed { .. }) => {
                let current = self.records.get(collection, target_id).await?;
                Err(WorkflowError::Record(RecordError::VersionConflict {
                    expected: record.version,
                    actual: current.version,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Guarded writes voiding every live pending entry for a target.
    pub(crate) async fn void_ops_for_target(
        &self,
        collection: Collection,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<WriteOp>, WorkflowError> {
        let mut ops = Vec::new();
        for doc in self.store.list(collections::PENDING_CHANGES).await? {
            let pending: PendingChange = doc.decode()?;
            if pending.collection != collection
                || pending.target_id != target_id
                || pending.status != PendingStatus::Pending
            {
                continue;
            }
            let mut voided = pending.clone();
            voided.status = PendingStatus::Voided;
            voided.status_updated_at = now;
            ops.push(WriteOp::put(
                collections::PENDING_CHANGES,
                voided.id.to_string(),
                &voided,
                Guard::RevisionIs(doc.revision),
            )?);
            ops.push(WriteOp::delete(
                collections::PENDING_INDEX,
                index_id(collection, target_id, &pending.field),
                Guard::Any,
            ));
        }
        Ok(ops)
    }

    /// Fetch one pending change.
    pub async fn get(&self, pending_id: Uuid) -> Result<PendingChange, WorkflowError> {
        Ok(self.load(pending_id).await?.0)
    }

    /// All unresolved pending changes, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<PendingChange>, WorkflowError> {
        let mut pending: Vec<PendingChange> = self
            .store
            .list(collections::PENDING_CHANGES)
            .await?
            .iter()
            .map(|doc| doc.decode::<PendingChange>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| p.status == PendingStatus::Pending)
            .collect();
        pending.sort_by_key(|p| p.requested_at);
        Ok(pending)
    }

    /// Full change history for one target, oldest first.
    pub async fn history_for_target(
        &self,
        collection: Collection,
        target_id: Uuid,
    ) -> Result<Vec<PendingChange>, WorkflowError> {
        let mut entries: Vec<PendingChange> = self
            .store
            .list(collections::PENDING_CHANGES)
            .await?
            .iter()
            .map(|doc| doc.decode::<PendingChange>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| p.collection == collection && p.target_id == target_id)
            .collect();
        entries.sort_by_key(|p| p.requested_at);
        Ok(entries)
    }

    /// Enforce the resubmission cooldown after a rejection.
    async fn check_cooldown(
        &self,
        collection: Collection,
        target_id: Uuid,
        field: &str,
        requester: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let history = self.history_for_target(collection, target_id).await?;
        let blocked_until = history
            .iter()
            .filter(|p| {
                p.field == field
                    && p.requested_by.id == requester.id
                    && p.status == PendingStatus::Rejected
            })
            .map(|p| p.status_updated_at + self.rejection_cooldown)
            .max();
        if let Some(until) = blocked_until {
            if now < until {
                let remaining = (until - now).num_minutes().max(1);
                return Err(WorkflowError::CooldownActive {
                    remaining_minutes: remaining,
                });
            }
        }
        Ok(())
    }

    /// Move one entry to a terminal state and drop its uniqueness index
    /// entry. `NotPending` signals a concurrent resolution.
    async fn transition(
        &self,
        pending: &PendingChange,
        revision: u64,
        status: PendingStatus,
        reviewed_by: Option<Actor>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.transition_with(pending, revision, status, reviewed_by, now, Vec::new())
            .await
    }

    /// Like [`Self::transition`], committing `extra_ops` (audit entries)
    /// in the same transaction.
    async fn transition_with(
        &self,
        pending: &PendingChange,
        revision: u64,
        status: PendingStatus,
        reviewed_by: Option<Actor>,
        now: DateTime<Utc>,
        extra_ops: Vec<WriteOp>,
    ) -> Result<(), WorkflowError> {
        let mut updated = pending.clone();
        updated.status = status;
        updated.status_updated_at = now;
        if status == PendingStatus::Rejected {
            updated.rejection_count += 1;
        }
        if reviewed_by.is_some() {
            updated.reviewed_by = reviewed_by;
        }

        let mut ops = vec![
            WriteOp::put(
                collections::PENDING_CHANGES,
                updated.id.to_string(),
                &updated,
                Guard::RevisionIs(revision),
            )?,
            WriteOp::delete(
                collections::PENDING_INDEX,
                index_id(pending.collection, pending.target_id, &pending.field),
                Guard::Any,
            ),
        ];
        ops.extend(extra_ops);
        match self.commit(ops).await {
            Ok(()) => Ok(()),
            Err(StoreError::GuardFailed { .. }) => Err(WorkflowError::NotPending),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, pending_id: Uuid) -> Result<(PendingChange, u64), WorkflowError> {
        let doc = self
            .store
            .get(collections::PENDING_CHANGES, &pending_id.to_string())
            .await?
            .ok_or(WorkflowError::NotFound)?;
        Ok((doc.decode()?, doc.revision))
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        with_retry(self.retry, || {
            self.store.commit(Transaction::new(ops.clone()))
        })
        .await
    }
}

fn index_id(collection: Collection, target_id: Uuid, field: &str) -> String {
    format!("{}/{}/{}", collection.as_str(), target_id, field)
}

fn catalog_err(e: CatalogError) -> WorkflowError {
    match e {
        CatalogError::Unavailable(inner) => WorkflowError::Unavailable(inner),
        other => WorkflowError::Validation(other.to_string()),
    }
}
