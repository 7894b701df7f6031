//! In-memory transactional store.
//!
//! Guard evaluation and writes happen under a single write lock, which is
//! the compare-and-set primitive closing read-modify-write races between
//! concurrent callers.

use super::{
    ChangeEvent, ChangeKind, Document, DocumentStore, Guard, OpKind, StoreError, Transaction,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{broadcast, RwLock};

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// A [`DocumentStore`] backed by process memory.
pub struct MemoryStore {
    inner: RwLock<Collections>,
    feed: broadcast::Sender<ChangeEvent>,
    /// Number of upcoming commits to fail with `Unavailable`. Used to
    /// exercise the bounded-retry path in tests.
    fail_next: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(HashMap::new()),
            feed,
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the next `count` commits fail with a transient error.
    #[doc(hidden)]
    pub fn inject_commit_failures(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn check_guard(
        existing: Option<&Document>,
        op_collection: &str,
        op_id: &str,
        guard: &Guard,
    ) -> Result<(), StoreError> {
        let actual = existing.map(|d| d.revision);
        let ok = match guard {
            Guard::Any => true,
            Guard::MustNotExist => existing.is_none(),
            Guard::MustExist => existing.is_some(),
            Guard::RevisionIs(rev) => actual == Some(*rev),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::GuardFailed {
                collection: op_collection.to_string(),
                id: op_id.to_string(),
                actual,
            })
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        let mut inner = self.inner.write().await;

        // Validate every guard before the first write so a failed
        // transaction leaves no observable intermediate state.
        for op in &tx.ops {
            let existing = inner.get(&op.collection).and_then(|docs| docs.get(&op.id));
            Self::check_guard(existing, &op.collection, &op.id, &op.guard)?;
        }

        let mut events = Vec::with_capacity(tx.ops.len());
        for op in tx.ops {
            let docs = inner.entry(op.collection.clone()).or_default();
            match op.kind {
                OpKind::Put(data) => {
                    let revision = docs.get(&op.id).map(|d| d.revision + 1).unwrap_or(1);
                    docs.insert(
                        op.id.clone(),
                        Document {
                            id: op.id.clone(),
                            revision,
                            data,
                        },
                    );
                    events.push(ChangeEvent {
                        collection: op.collection,
                        id: op.id,
                        kind: ChangeKind::Put,
                        revision: Some(revision),
                    });
                }
                OpKind::Delete => {
                    docs.remove(&op.id);
                    events.push(ChangeEvent {
                        collection: op.collection,
                        id: op.id,
                        kind: ChangeKind::Delete,
                        revision: None,
                    });
                }
            }
        }
        drop(inner);

        for event in events {
            // No receivers is fine.
            let _ = self.feed.send(event);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::WriteOp;
    use serde_json::json;

    fn put(collection: &str, id: &str, value: serde_json::Value, guard: Guard) -> WriteOp {
        WriteOp {
            collection: collection.to_string(),
            id: id.to_string(),
            kind: OpKind::Put(value),
            guard,
        }
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let store = MemoryStore::new();
        store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({"x": 1}),
                Guard::MustNotExist,
            )]))
            .await
            .unwrap();

        let doc = store.get("orders", "a").await.unwrap().unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.data, json!({"x": 1}));
        assert!(store.get("orders", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revision_guard_rejects_stale_writers() {
        let store = MemoryStore::new();
        store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({"v": 1}),
                Guard::MustNotExist,
            )]))
            .await
            .unwrap();

        // First writer at revision 1 wins.
        store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({"v": 2}),
                Guard::RevisionIs(1),
            )]))
            .await
            .unwrap();

        // Second writer at revision 1 loses with the accurate actual.
        let err = store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({"v": 3}),
                Guard::RevisionIs(1),
            )]))
            .await
            .unwrap_err();
        match err {
            StoreError::GuardFailed { actual, .. } => assert_eq!(actual, Some(2)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failed_transaction_applies_nothing() {
        let store = MemoryStore::new();
        store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({"v": 1}),
                Guard::MustNotExist,
            )]))
            .await
            .unwrap();

        // Second op's guard fails, so the first op must not land either.
        let err = store
            .commit(Transaction::new(vec![
                put("orders", "b", json!({"v": 1}), Guard::MustNotExist),
                put("orders", "a", json!({"v": 9}), Guard::MustNotExist),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GuardFailed { .. }));

        assert!(store.get("orders", "b").await.unwrap().is_none());
        let a = store.get("orders", "a").await.unwrap().unwrap();
        assert_eq!(a.data, json!({"v": 1}));
    }

    #[tokio::test]
    async fn change_feed_reports_commits() {
        let store = MemoryStore::new();
        let mut feed = store.watch();

        store
            .commit(Transaction::new(vec![
                put("orders", "a", json!({}), Guard::MustNotExist),
                WriteOp::delete("orders", "zzz", Guard::Any),
            ]))
            .await
            .unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Put);
        assert_eq!(first.revision, Some(1));
        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let store = MemoryStore::new();
        store.inject_commit_failures(1);

        let err = store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({}),
                Guard::MustNotExist,
            )]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        // The next commit goes through.
        store
            .commit(Transaction::new(vec![put(
                "orders",
                "a",
                json!({}),
                Guard::MustNotExist,
            )]))
            .await
            .unwrap();
    }
}
