//! Engine services: the mutation-control logic behind the facade.

pub mod audit;
pub mod catalog;
pub mod login_guard;
pub mod permissions;
pub mod records;
pub mod retry;
pub mod session;
pub mod workflow;

pub use audit::AuditService;
pub use catalog::{CatalogError, CatalogService, ColumnUpdate};
pub use login_guard::{AuthError, Gate, LoginGuard};
pub use permissions::PermissionSnapshot;
pub use records::{RecordError, RecordService};
pub use retry::RetryPolicy;
pub use session::SessionPolicy;
pub use workflow::{WorkflowError, WorkflowService};
