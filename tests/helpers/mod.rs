//! Shared fixtures: an engine backed by the in-memory store and a manual
//! clock, with a seeded column catalog and per-role permission tables.
//!
//! Seeded columns (besides the system ones):
//!   price    Number
//!   notes    Text
//!   category Select { hardware, software }
//!   margin   Number   (invisible to sales roles)
//!
//! Role tables:
//!   super_admin / manager  full on everything
//!   sr_sales               full on price/notes/category/status, no margin
//!   jr_sales               price approval-required, notes full,
//!                          category read-only, no margin

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ordergate::config::EngineConfig;
use ordergate::domain::{
    ColumnDefinition, ColumnPermission, ColumnType, FieldValue, Role, RolePermission,
};
use ordergate::shared::{Actor, ManualClock};
use ordergate::Core;
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn engine() -> (Arc<Core>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
    ));
    let config = EngineConfig::default_with_dir(std::env::temp_dir());
    let core = Core::in_memory_with_clock(config, clock.clone())
        .await
        .expect("engine construction");
    seed_catalog(&core).await;
    (Arc::new(core), clock)
}

pub fn actor(id: &str) -> Actor {
    Actor::new(id, id.to_uppercase())
}

pub fn fields(entries: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn seed_catalog(core: &Core) {
    let mut price = ColumnDefinition::new("price", "Price", ColumnType::Number);
    price.display_order = 10;
    let mut notes = ColumnDefinition::new("notes", "Notes", ColumnType::Text);
    notes.display_order = 11;
    let mut category = ColumnDefinition::new("category", "Category", ColumnType::Select);
    category.display_order = 12;
    category.options = vec!["hardware".into(), "software".into()];
    let mut margin = ColumnDefinition::new("margin", "Margin", ColumnType::Number);
    margin.display_order = 13;

    for column in [price, notes, category, margin] {
        core.catalog
            .create_column(Role::SuperAdmin, column)
            .await
            .expect("seed column");
    }

    for role in [Role::SuperAdmin, Role::Manager] {
        set_table(
            core,
            role,
            &[
                ("month", ColumnPermission::read_only()),
                ("status", ColumnPermission::full()),
                ("price", ColumnPermission::full()),
                ("notes", ColumnPermission::full()),
                ("category", ColumnPermission::full()),
                ("margin", ColumnPermission::full()),
            ],
        )
        .await;
    }
    set_table(
        core,
        Role::SrSales,
        &[
            ("month", ColumnPermission::read_only()),
            ("status", ColumnPermission::full()),
            ("price", ColumnPermission::full()),
            ("notes", ColumnPermission::full()),
            ("category", ColumnPermission::full()),
        ],
    )
    .await;
    set_table(
        core,
        Role::JrSales,
        &[
            ("month", ColumnPermission::read_only()),
            ("status", ColumnPermission::read_only()),
            ("price", ColumnPermission::approval_required()),
            ("notes", ColumnPermission::full()),
            ("category", ColumnPermission::read_only()),
        ],
    )
    .await;
}

async fn set_table(core: &Core, role: Role, entries: &[(&str, ColumnPermission)]) {
    let mut table = RolePermission::empty(role);
    for (key, permission) in entries {
        table.permissions.insert(key.to_string(), *permission);
    }
    core.catalog
        .set_role_permissions(Role::SuperAdmin, table)
        .await
        .expect("seed role permissions");
}
