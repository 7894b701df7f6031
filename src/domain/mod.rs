//! Pure data model: roles, columns, records, pending changes, audit
//! entries and sessions. No I/O lives here.

pub mod audit;
pub mod column;
pub mod pending;
pub mod record;
pub mod role;
pub mod session;

pub use audit::{AuditAction, AuditEntry};
pub use column::{
    ColumnDefinition, ColumnPermission, ColumnType, RolePermission, SYSTEM_COLUMN_KEYS,
};
pub use pending::{PendingChange, PendingStatus};
pub use record::{Collection, FieldValue, Record, RecordStatus};
pub use role::Role;
pub use session::SessionInfo;
