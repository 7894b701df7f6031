//! Abstract transactional document store.
//!
//! The engine is defined entirely against three store capabilities:
//! point reads, guarded multi-document transactions, and a change feed.
//! Any backend that provides compare-and-set over documents can sit
//! behind [`DocumentStore`]; the crate ships an in-memory implementation
//! in [`memory`].

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::MemoryStore;

/// Well-known collection names.
pub mod collections {
    pub const ORDERS: &str = "orders";
    pub const COSTS: &str = "costs";
    pub const PENDING_CHANGES: &str = "pending_changes";
    /// Uniqueness index: one document per live (target, field) pending
    /// pair. Inserted `MustNotExist` in the same transaction as the
    /// pending entry, deleted in the resolving transaction.
    pub const PENDING_INDEX: &str = "pending_index";
    pub const AUDIT_LOG: &str = "audit_log";
    pub const COLUMNS: &str = "columns";
    pub const ROLE_PERMISSIONS: &str = "role_permissions";
}

/// Store-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transaction guard did not hold. `actual` is the revision found,
    /// or `None` when the document does not exist.
    #[error("guard failed on {collection}/{id} (actual revision: {actual:?})")]
    GuardFailed {
        collection: String,
        id: String,
        actual: Option<u64>,
    },

    /// Transient backend failure. Callers retry a bounded number of
    /// times before surfacing this.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A stored document with its store-managed revision.
///
/// Revisions start at 1 on insert and increase by one per write, so for
/// record documents the revision always equals the record version.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub revision: u64,
    pub data: serde_json::Value,
}

impl Document {
    /// Decode the document payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Precondition attached to a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The document must not exist (check-and-insert).
    MustNotExist,
    /// The document must exist, at any revision.
    MustExist,
    /// The document must exist at exactly this revision
    /// (compare-and-set).
    RevisionIs(u64),
    /// No precondition.
    Any,
}

/// The write half of a [`WriteOp`].
#[derive(Debug, Clone)]
pub enum OpKind {
    Put(serde_json::Value),
    Delete,
}

/// One guarded write inside a transaction.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub collection: String,
    pub id: String,
    pub kind: OpKind,
    pub guard: Guard,
}

impl WriteOp {
    pub fn put<T: Serialize>(
        collection: &str,
        id: impl Into<String>,
        value: &T,
        guard: Guard,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            collection: collection.to_string(),
            id: id.into(),
            kind: OpKind::Put(serde_json::to_value(value)?),
            guard,
        })
    }

    pub fn delete(collection: &str, id: impl Into<String>, guard: Guard) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.into(),
            kind: OpKind::Delete,
            guard,
        }
    }
}

/// An all-or-nothing batch of guarded writes.
///
/// Every guard is checked before any write lands; a transaction may
/// touch a given document at most once.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

/// What happened to a document, published on the change feed.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
    /// Revision after the write; `None` for deletes.
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Put,
    Delete,
}

/// Transactional key-value/document store capability.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents in a collection, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Commit a guarded transaction atomically.
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError>;

    /// Subscribe to the change feed.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}
