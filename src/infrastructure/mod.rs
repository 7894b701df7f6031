//! Infrastructure: the transactional store abstraction and the event bus.

pub mod events;
pub mod store;
