//! Ordergate engine.
//!
//! A mutation-control engine for shared, field-level-permissioned tabular
//! records (orders and costs) edited concurrently by users with different
//! roles. The engine enforces:
//!
//! - optimistic-concurrency writes: every field mutation presents the
//!   version it last read and loses cleanly on conflict,
//! - field-level permissions per role, with approval-required fields
//!   routed through a reviewable pending-change workflow,
//! - an append-only audit trail written in the same transaction as the
//!   mutation it describes,
//! - login attempt throttling and idle/absolute/remember-me session
//!   expiry.
//!
//! Storage, identity verification and transport are external
//! collaborators; the engine talks to storage through the
//! [`infrastructure::store::DocumentStore`] capability and to time
//! through [`shared::Clock`].

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod shared;

use crate::config::EngineConfig;
use crate::domain::{
    Collection, ColumnDefinition, FieldValue, PendingChange, PendingStatus, Record, Role,
    RolePermission,
};
use crate::infrastructure::events::{Event, EventBus};
use crate::infrastructure::store::{ChangeEvent, DocumentStore, MemoryStore};
use crate::services::catalog::CatalogError;
use crate::services::{
    AuditService, AuthError, CatalogService, ColumnUpdate, LoginGuard, PermissionSnapshot,
    RecordError, RecordService, RetryPolicy, SessionPolicy, WorkflowError, WorkflowService,
};
use crate::shared::{Actor, SharedClock, SystemClock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Install a global tracing subscriber. `RUST_LOG` wins when set,
/// otherwise the configured level applies to this crate. Safe to call
/// more than once.
pub fn init_logging(config: &EngineConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,ordergate={}", config.log_level)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The engine: an explicitly constructed, dependency-injected service
/// instance with a start/stop lifecycle. No process-wide singletons.
pub struct Core {
    pub config: EngineConfig,
    pub events: Arc<EventBus>,
    pub catalog: Arc<CatalogService>,
    pub records: Arc<RecordService>,
    pub workflow: Arc<WorkflowService>,
    pub audit: Arc<AuditService>,
    pub login_guard: Arc<LoginGuard>,
    pub sessions: Arc<SessionPolicy>,

    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    /// Build the engine against an injected store and clock, seeding the
    /// system columns and empty per-role permission tables.
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let policy = &config.policy;
        let retry = RetryPolicy::new(policy.store_retry_attempts, policy.store_retry_backoff_ms);

        let events = Arc::new(EventBus::default());
        let audit = Arc::new(AuditService::new(store.clone()));
        let catalog = Arc::new(CatalogService::new(store.clone(), retry));
        let records = Arc::new(RecordService::new(
            store.clone(),
            clock.clone(),
            catalog.clone(),
            audit.clone(),
            retry,
            policy.retention(),
        ));
        let workflow = Arc::new(WorkflowService::new(
            store.clone(),
            clock.clone(),
            catalog.clone(),
            records.clone(),
            audit.clone(),
            retry,
            policy.pending_expiry(),
            policy.rejection_cooldown(),
        ));
        let login_guard = Arc::new(LoginGuard::new(
            clock.clone(),
            policy.rate_limit_window(),
            policy.rate_limit_max_attempts,
            policy.rate_limit_challenge_threshold,
        ));
        let sessions = Arc::new(SessionPolicy::new(
            clock.clone(),
            policy.session_idle_timeout(),
            policy.session_absolute(),
            policy.session_remember_me(),
        ));

        catalog.ensure_defaults().await?;

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            events,
            catalog,
            records,
            workflow,
            audit,
            login_guard,
            sessions,
            store,
            clock,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Engine backed by the in-memory store and the system clock.
    pub async fn in_memory(config: EngineConfig) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock)).await
    }

    /// Engine backed by the in-memory store and an injected clock.
    pub async fn in_memory_with_clock(
        config: EngineConfig,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), clock).await
    }

    /// Start the periodic maintenance sweepers (pending-change expiry and
    /// retention purge). Both are idempotent and safe under overlapping
    /// invocations.
    pub async fn start(&self) {
        let period = StdDuration::from_secs(self.config.policy.sweep_interval_secs.max(1));

        let workflow = self.workflow.clone();
        let clock = self.clock.clone();
        let mut shutdown = self.shutdown.subscribe();
        let expiry = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = workflow.expire_sweep(clock.now()).await {
                            warn!("expiry sweep failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        let records = self.records.clone();
        let clock = self.clock.clone();
        let mut shutdown = self.shutdown.subscribe();
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = purge_past_retention(&records, &clock).await {
                            warn!("retention purge failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        self.tasks.lock().await.extend([expiry, purge]);
        self.events.emit(Event::EngineStarted);
        info!("engine started");
    }

    /// Stop the maintenance sweepers and wait for them to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.events.emit(Event::EngineShutdown);
        info!("engine stopped");
    }

    /// Subscribe to the store's raw change feed.
    pub fn watch_store(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.watch()
    }

    // --- record surface -------------------------------------------------

    /// Create a record. Each provided field needs at least
    /// change-with-approval permission; creation itself never routes
    /// through the pending workflow.
    pub async fn create_record(
        &self,
        collection: Collection,
        month: String,
        fields: BTreeMap<String, FieldValue>,
        order_id: Option<Uuid>,
        actor: Actor,
        role: Role,
    ) -> Result<Record, RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        for key in fields.keys() {
            if !snapshot.may_change(role, key) {
                return Err(RecordError::Forbidden);
            }
        }
        let record = self
            .records
            .create(collection, month, fields, order_id, actor)
            .await?;
        self.events.emit(Event::RecordCreated {
            collection,
            id: record.id,
        });
        Ok(record)
    }

    /// Directly edit one field. Fields marked approval-required for the
    /// role are refused here; those edits go through
    /// [`Core::propose_change`].
    pub async fn edit_field(
        &self,
        collection: Collection,
        id: Uuid,
        field: &str,
        value: FieldValue,
        expected_version: u64,
        actor: Actor,
        role: Role,
    ) -> Result<u64, RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        if snapshot.requires_approval(role, field) || !snapshot.editable(role, field) {
            return Err(RecordError::Forbidden);
        }
        let version = self
            .records
            .update_field(collection, id, field, value, expected_version, actor)
            .await?;
        self.events.emit(Event::RecordUpdated {
            collection,
            id,
            field: field.to_string(),
            version,
        });
        Ok(version)
    }

    /// Fetch one record with fields the role cannot see stripped out.
    pub async fn get_record(
        &self,
        collection: Collection,
        id: Uuid,
        role: Role,
    ) -> Result<Record, RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        let record = self.records.get(collection, id).await?;
        Ok(redact(record, &snapshot, role))
    }

    /// Active records in a collection, redacted per role.
    pub async fn list_records(
        &self,
        collection: Collection,
        role: Role,
    ) -> Result<Vec<Record>, RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        let records = self.records.list(collection, false).await?;
        Ok(records
            .into_iter()
            .map(|r| redact(r, &snapshot, role))
            .collect())
    }

    /// Soft-delete a record, voiding every pending change that targets it
    /// in the same transaction.
    pub async fn delete_record(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Actor,
        role: Role,
    ) -> Result<u64, WorkflowError> {
        let snapshot = self.snapshot().await.map_err(WorkflowError::Record)?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(WorkflowError::Forbidden);
        }
        let version = self
            .workflow
            .cascade_soft_delete(collection, id, actor)
            .await?;
        self.events
            .emit(Event::RecordSoftDeleted { collection, id });
        Ok(version)
    }

    /// Recover a soft-deleted record within the retention window.
    pub async fn recover_record(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Actor,
        role: Role,
    ) -> Result<u64, RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        let version = self.records.recover(collection, id, actor).await?;
        self.events.emit(Event::RecordRecovered { collection, id });
        Ok(version)
    }

    /// Permanently purge a soft-deleted record past retention.
    pub async fn purge_record(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Actor,
        role: Role,
    ) -> Result<(), RecordError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.can_access_collection(role, collection) {
            return Err(RecordError::Forbidden);
        }
        self.records.purge(collection, id, actor).await?;
        self.events.emit(Event::RecordPurged { collection, id });
        Ok(())
    }

    // --- workflow surface -----------------------------------------------

    /// Propose a field edit for review.
    pub async fn propose_change(
        &self,
        collection: Collection,
        target_id: Uuid,
        field: &str,
        new_value: FieldValue,
        requester: Actor,
        role: Role,
    ) -> Result<PendingChange, WorkflowError> {
        let pending = self
            .workflow
            .propose(collection, target_id, field, new_value, requester, role)
            .await?;
        self.events.emit(Event::PendingProposed {
            id: pending.id,
            collection,
            target_id,
            field: field.to_string(),
        });
        Ok(pending)
    }

    /// Approve a pending change, applying it to the record.
    pub async fn approve_change(
        &self,
        pending_id: Uuid,
        reviewer: Actor,
        role: Role,
        acknowledged_version: Option<u64>,
    ) -> Result<u64, WorkflowError> {
        let version = self
            .workflow
            .approve(pending_id, reviewer, role, acknowledged_version)
            .await?;
        self.events.emit(Event::PendingResolved {
            id: pending_id,
            status: PendingStatus::Approved,
        });
        Ok(version)
    }

    /// Reject a pending change.
    pub async fn reject_change(
        &self,
        pending_id: Uuid,
        reviewer: Actor,
        role: Role,
    ) -> Result<(), WorkflowError> {
        self.workflow.reject(pending_id, reviewer, role).await?;
        self.events.emit(Event::PendingResolved {
            id: pending_id,
            status: PendingStatus::Rejected,
        });
        Ok(())
    }

    /// Withdraw a pending change (requester only).
    pub async fn withdraw_change(
        &self,
        pending_id: Uuid,
        requester: Actor,
    ) -> Result<(), WorkflowError> {
        self.workflow.withdraw(pending_id, requester).await?;
        self.events.emit(Event::PendingResolved {
            id: pending_id,
            status: PendingStatus::Withdrawn,
        });
        Ok(())
    }

    // --- catalog surface --------------------------------------------------

    /// Add a column to the catalog (super admin only).
    pub async fn create_column(
        &self,
        actor_role: Role,
        column: ColumnDefinition,
    ) -> Result<(), CatalogError> {
        self.catalog.create_column(actor_role, column).await?;
        self.events.emit(Event::CatalogChanged);
        Ok(())
    }

    /// Update an existing column (super admin only).
    pub async fn update_column(
        &self,
        actor_role: Role,
        key: &str,
        update: ColumnUpdate,
    ) -> Result<ColumnDefinition, CatalogError> {
        let column = self.catalog.update_column(actor_role, key, update).await?;
        self.events.emit(Event::CatalogChanged);
        Ok(column)
    }

    /// Remove a non-system column (super admin only).
    pub async fn delete_column(&self, actor_role: Role, key: &str) -> Result<(), CatalogError> {
        self.catalog.delete_column(actor_role, key).await?;
        self.events.emit(Event::CatalogChanged);
        Ok(())
    }

    /// Replace the permission table for one role (super admin only).
    pub async fn set_role_permissions(
        &self,
        actor_role: Role,
        table: RolePermission,
    ) -> Result<(), CatalogError> {
        self.catalog.set_role_permissions(actor_role, table).await?;
        self.events.emit(Event::CatalogChanged);
        Ok(())
    }

    // --- authentication surface ------------------------------------------

    /// Gate a login attempt. `Ok(true)` means a human-verification
    /// challenge must be presented before the attempt proceeds.
    pub async fn check_login(&self, identity: &str) -> Result<bool, AuthError> {
        self.login_guard.ensure_allowed(identity).await
    }

    /// Record a failed authentication attempt.
    pub async fn record_login_failure(&self, identity: &str) {
        self.login_guard.record_failure(identity).await;
    }

    /// Clear attempt history after successful authentication.
    pub async fn clear_login_failures(&self, identity: &str) {
        self.login_guard.clear(identity).await;
    }

    // --- maintenance ------------------------------------------------------

    /// Run the pending-change expiry sweep once.
    pub async fn expire_sweep(&self) -> Result<usize, WorkflowError> {
        self.workflow.expire_sweep(self.clock.now()).await
    }

    /// Run the retention purge once.
    pub async fn purge_sweep(&self) -> Result<usize, RecordError> {
        let purged = purge_past_retention(&self.records, &self.clock).await?;
        Ok(purged)
    }

    async fn snapshot(&self) -> Result<PermissionSnapshot, RecordError> {
        self.catalog.snapshot().await.map_err(|e| match e {
            CatalogError::Unavailable(inner) => RecordError::Unavailable(inner),
            other => RecordError::Validation(other.to_string()),
        })
    }
}

/// Strip dynamic fields the role cannot see.
fn redact(mut record: Record, snapshot: &PermissionSnapshot, role: Role) -> Record {
    record
        .dynamic_fields
        .retain(|key, _| snapshot.visible(role, key));
    record
}

/// Purge every soft-deleted record whose retention window has lapsed.
async fn purge_past_retention(
    records: &Arc<RecordService>,
    clock: &SharedClock,
) -> Result<usize, RecordError> {
    let eligible = records.purge_eligible(clock.now()).await?;
    let mut purged = 0;
    for (collection, id) in eligible {
        match records.purge(collection, id, Actor::system()).await {
            Ok(()) => purged += 1,
            // Raced with a concurrent purge, recovery, or re-delete; skip.
            Err(RecordError::NotFound)
            | Err(RecordError::NotDeleted)
            | Err(RecordError::RetentionActive) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(purged)
}
