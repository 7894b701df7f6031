//! Cross-cutting primitives: time source and identity types.

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use types::{validate_month, Actor};
