//! User roles.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The fixed set of roles known to the engine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Manager,
    SrSales,
    JrSales,
}

impl Role {
    /// Every role, in privilege order.
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Manager, Role::SrSales, Role::JrSales];

    /// Whether this role may review (approve/reject) pending changes.
    pub fn can_review(self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Manager)
    }

    /// Whether this role may administer the column catalog and
    /// role-permission tables.
    pub fn is_super_admin(self) -> bool {
        matches!(self, Role::SuperAdmin)
    }
}
