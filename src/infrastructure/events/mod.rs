//! Event bus for decoupled communication.
//!
//! Domain events are emitted after successful commits. Consumers building
//! derived views must treat them as invalidation hints, never as the
//! source of truth for version numbers.

use crate::domain::{Collection, PendingStatus};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine-level events.
#[derive(Debug, Clone)]
pub enum Event {
    /// Engine has started.
    EngineStarted,

    /// Engine is shutting down.
    EngineShutdown,

    /// A record was created.
    RecordCreated { collection: Collection, id: Uuid },

    /// A record field was updated (direct edit or approved change).
    RecordUpdated {
        collection: Collection,
        id: Uuid,
        field: String,
        version: u64,
    },

    /// A record was soft-deleted.
    RecordSoftDeleted { collection: Collection, id: Uuid },

    /// A soft-deleted record was recovered.
    RecordRecovered { collection: Collection, id: Uuid },

    /// A record was permanently purged.
    RecordPurged { collection: Collection, id: Uuid },

    /// A pending change was proposed.
    PendingProposed {
        id: Uuid,
        collection: Collection,
        target_id: Uuid,
        field: String,
    },

    /// A pending change reached a terminal state.
    PendingResolved { id: Uuid, status: PendingStatus },

    /// The column catalog or a role permission table changed.
    CatalogChanged,
}

/// Event bus for broadcasting events.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event.
    pub fn emit(&self, event: Event) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
