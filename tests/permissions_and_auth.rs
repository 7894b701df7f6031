//! Field-level permissions, catalog administration and login gating.

mod helpers;

use chrono::Duration;
use helpers::{actor, engine, fields};
use ordergate::domain::{
    Collection, ColumnDefinition, ColumnType, FieldValue, Role,
};
use ordergate::services::{AuthError, CatalogError, ColumnUpdate, Gate, RecordError};

#[tokio::test]
async fn sales_roles_cannot_touch_costs() {
    let (core, _clock) = engine().await;

    for role in [Role::JrSales, Role::SrSales] {
        let err = core
            .create_record(
                Collection::Costs,
                "2024-05".into(),
                fields(&[]),
                None,
                actor("s1"),
                role,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Forbidden));

        let err = core.list_records(Collection::Costs, role).await.unwrap_err();
        assert!(matches!(err, RecordError::Forbidden));
    }

    // Managers and super admins pass the gate.
    core.create_record(
        Collection::Costs,
        "2024-05".into(),
        fields(&[]),
        None,
        actor("mgr"),
        Role::Manager,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn invisible_columns_are_stripped_from_reads() {
    let (core, _clock) = engine().await;

    let record = core
        .create_record(
            Collection::Orders,
            "2024-05".into(),
            fields(&[
                ("price", FieldValue::Number(100.0)),
                ("margin", FieldValue::Number(0.4)),
            ]),
            None,
            actor("mgr"),
            Role::Manager,
        )
        .await
        .unwrap();

    let full = core
        .get_record(Collection::Orders, record.id, Role::Manager)
        .await
        .unwrap();
    assert_eq!(full.field("margin"), FieldValue::Number(0.4));

    // Sales roles have no entry for margin, so it reads as unset.
    for role in [Role::SrSales, Role::JrSales] {
        let redacted = core
            .get_record(Collection::Orders, record.id, role)
            .await
            .unwrap();
        assert_eq!(redacted.field("margin"), FieldValue::Null);
        assert_eq!(redacted.field("price"), FieldValue::Number(100.0));

        let listed = core.list_records(Collection::Orders, role).await.unwrap();
        assert!(!listed[0].dynamic_fields.contains_key("margin"));
    }
}

#[tokio::test]
async fn creation_requires_change_permission_on_every_field() {
    let (core, _clock) = engine().await;

    // jr_sales holds approval-required on price, which is enough to seed
    // a value at creation time.
    core.create_record(
        Collection::Orders,
        "2024-05".into(),
        fields(&[("price", FieldValue::Number(10.0))]),
        None,
        actor("jr1"),
        Role::JrSales,
    )
    .await
    .unwrap();

    // But category is read-only and margin invisible.
    for field in ["category", "margin"] {
        let value = match field {
            "category" => FieldValue::Text("hardware".into()),
            _ => FieldValue::Number(0.1),
        };
        let err = core
            .create_record(
                Collection::Orders,
                "2024-05".into(),
                fields(&[(field, value)]),
                None,
                actor("jr1"),
                Role::JrSales,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Forbidden));
    }
}

#[tokio::test]
async fn catalog_administration_is_super_admin_only() {
    let (core, _clock) = engine().await;

    let column = ColumnDefinition::new("discount", "Discount", ColumnType::Number);
    for role in [Role::Manager, Role::SrSales, Role::JrSales] {
        let err = core.create_column(role, column.clone()).await.unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden));
    }
    core.create_column(Role::SuperAdmin, column).await.unwrap();

    // System columns are immortal.
    let err = core
        .delete_column(Role::SuperAdmin, "status")
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::SystemField(_)));

    core.delete_column(Role::SuperAdmin, "discount")
        .await
        .unwrap();
}

#[tokio::test]
async fn column_types_freeze_once_data_exists() {
    let (core, _clock) = engine().await;

    // No data yet: the type may change.
    let updated = core
        .update_column(
            Role::SuperAdmin,
            "notes",
            ColumnUpdate {
                column_type: Some(ColumnType::Number),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.column_type, ColumnType::Number);

    core.create_record(
        Collection::Orders,
        "2024-05".into(),
        fields(&[("notes", FieldValue::Number(1.0))]),
        None,
        actor("mgr"),
        Role::Manager,
    )
    .await
    .unwrap();

    let err = core
        .update_column(
            Role::SuperAdmin,
            "notes",
            ColumnUpdate {
                column_type: Some(ColumnType::Text),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));

    // Non-type attributes stay mutable.
    let updated = core
        .update_column(
            Role::SuperAdmin,
            "notes",
            ColumnUpdate {
                label: Some("Remarks".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.label, "Remarks");
}

#[tokio::test]
async fn repeated_login_failures_lock_the_identity() {
    let (core, clock) = engine().await;

    for i in 0..5 {
        let challenge = core.check_login("alice").await.unwrap();
        assert_eq!(challenge, i >= 3, "attempt {i}");
        core.record_login_failure("alice").await;
    }

    let err = core.check_login("alice").await.unwrap_err();
    match err {
        AuthError::RateLimited { remaining_minutes } => {
            assert_eq!(remaining_minutes, 15);
        }
    }

    // Other identities are unaffected.
    assert_eq!(core.check_login("bob").await.unwrap(), false);

    // The lockout drains with the window.
    clock.advance(Duration::minutes(15));
    assert_eq!(core.check_login("alice").await.unwrap(), false);
}

#[tokio::test]
async fn a_successful_login_clears_the_failure_history() {
    let (core, _clock) = engine().await;

    for _ in 0..4 {
        core.record_login_failure("alice").await;
    }
    assert!(matches!(
        core.login_guard.check("alice").await,
        Gate::Allowed {
            challenge_required: true
        }
    ));

    core.clear_login_failures("alice").await;
    assert!(matches!(
        core.login_guard.check("alice").await,
        Gate::Allowed {
            challenge_required: false
        }
    ));
}

#[tokio::test]
async fn session_expiry_follows_the_policy() {
    let (core, clock) = engine().await;

    let mut session = core.sessions.start(false);
    clock.advance(Duration::minutes(29));
    assert!(core.sessions.is_valid_now(&session));
    core.sessions.touch(&mut session);
    clock.advance(Duration::minutes(29));
    assert!(core.sessions.is_valid_now(&session));
    clock.advance(Duration::minutes(2));
    assert!(!core.sessions.is_valid_now(&session));

    // Remember-me sessions skip the idle timeout but still hit the
    // absolute ceiling.
    let session = core.sessions.start(true);
    clock.advance(Duration::days(29));
    assert!(core.sessions.is_valid_now(&session));
    clock.advance(Duration::days(2));
    assert!(!core.sessions.is_valid_now(&session));
}
