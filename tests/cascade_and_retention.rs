//! Soft-delete cascade, recovery window and permanent purge.

mod helpers;

use chrono::Duration;
use helpers::{actor, engine, fields};
use ordergate::domain::{Collection, FieldValue, PendingStatus, Role};
use ordergate::services::{RecordError, WorkflowError};
use uuid::Uuid;

async fn seeded_order(core: &ordergate::Core) -> Uuid {
    core.create_record(
        Collection::Orders,
        "2024-05".into(),
        fields(&[("price", FieldValue::Number(100.0))]),
        None,
        actor("mgr"),
        Role::Manager,
    )
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn deleting_a_record_voids_its_pending_changes() {
    let (core, _clock) = engine().await;
    let order = seeded_order(&core).await;

    let pending = core
        .propose_change(
            Collection::Orders,
            order,
            "price",
            FieldValue::Number(80.0),
            actor("jr1"),
            Role::JrSales,
        )
        .await
        .unwrap();

    core.delete_record(Collection::Orders, order, actor("mgr"), Role::Manager)
        .await
        .unwrap();

    // Gone from the active view, still addressable.
    assert!(matches!(
        core.records.get_active(Collection::Orders, order).await,
        Err(RecordError::NotFound)
    ));
    let record = core.records.get(Collection::Orders, order).await.unwrap();
    assert!(record.is_deleted());

    // The pending change was voided in the same transaction and can no
    // longer apply to the vanished record.
    let voided = core.workflow.get(pending.id).await.unwrap();
    assert_eq!(voided.status, PendingStatus::Voided);
    let err = core
        .approve_change(pending.id, actor("mgr"), Role::Manager, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotPending));

    // The slot is free again once the record is recovered.
    core.recover_record(Collection::Orders, order, actor("mgr"), Role::Manager)
        .await
        .unwrap();
    core.propose_change(
        Collection::Orders,
        order,
        "price",
        FieldValue::Number(80.0),
        actor("jr1"),
        Role::JrSales,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn recovery_works_only_inside_the_retention_window() {
    let (core, clock) = engine().await;
    let order = seeded_order(&core).await;
    let manager = actor("mgr");

    core.delete_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap();

    clock.advance(Duration::days(29));
    let version = core
        .recover_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap();
    assert_eq!(version, 3);

    // Delete again and let retention lapse.
    core.delete_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap();
    clock.advance(Duration::days(30) + Duration::seconds(1));
    let err = core
        .recover_record(Collection::Orders, order, manager, Role::Manager)
        .await
        .unwrap_err();
    assert!(matches!(err, RecordError::RetentionExpired));
}

#[tokio::test]
async fn purge_respects_the_retention_window() {
    let (core, clock) = engine().await;
    let order = seeded_order(&core).await;
    let manager = actor("mgr");

    // Not deleted yet.
    let err = core
        .purge_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap_err();
    assert!(matches!(err, RecordError::NotDeleted));

    core.delete_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap();

    // Still inside retention.
    clock.advance(Duration::days(29));
    let err = core
        .purge_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap_err();
    assert!(matches!(err, RecordError::RetentionActive));

    clock.advance(Duration::days(1) + Duration::seconds(1));
    core.purge_record(Collection::Orders, order, manager, Role::Manager)
        .await
        .unwrap();

    assert!(matches!(
        core.records.get(Collection::Orders, order).await,
        Err(RecordError::NotFound)
    ));

    // The audit trail outlives the record.
    let trail = core
        .audit
        .for_target(Collection::Orders, order)
        .await
        .unwrap();
    assert!(!trail.is_empty());
}

#[tokio::test]
async fn the_purge_sweep_collects_lapsed_records() {
    let (core, clock) = engine().await;
    let manager = actor("mgr");

    let old = seeded_order(&core).await;
    core.delete_record(Collection::Orders, old, manager.clone(), Role::Manager)
        .await
        .unwrap();

    clock.advance(Duration::days(15));
    let fresh = seeded_order(&core).await;
    core.delete_record(Collection::Orders, fresh, manager, Role::Manager)
        .await
        .unwrap();

    clock.advance(Duration::days(15) + Duration::seconds(1));
    assert_eq!(core.purge_sweep().await.unwrap(), 1);

    assert!(matches!(
        core.records.get(Collection::Orders, old).await,
        Err(RecordError::NotFound)
    ));
    // The fresh one is only 15 days into retention.
    assert!(core.records.get(Collection::Orders, fresh).await.is_ok());

    clock.advance(Duration::days(15));
    assert_eq!(core.purge_sweep().await.unwrap(), 1);
    assert_eq!(core.purge_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn deleting_twice_reports_not_found() {
    let (core, _clock) = engine().await;
    let order = seeded_order(&core).await;
    let manager = actor("mgr");

    core.delete_record(Collection::Orders, order, manager.clone(), Role::Manager)
        .await
        .unwrap();
    let err = core
        .delete_record(Collection::Orders, order, manager, Role::Manager)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Record(RecordError::NotFound)
    ));
}
