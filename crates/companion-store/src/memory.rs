// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process document store.
//
// Behaves like the hosted store as far as the agent can tell: ordered range
// queries, partial updates and query/document change feeds with
// added/modified/removed semantics.  Used by the test-suite and by
// `companion --offline`.  Every successful mutation is appended to a journal
// so that callers can assert on exactly which remote side effects happened.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use companion_core::error::{CompanionError, Result};

use crate::document::{ChangeEvent, ChangeKind, Document, FieldUpdate, apply_updates, parent_path};
use crate::feed::{ChangeStream, FeedSender};
use crate::store::DocumentStore;

/// Buffered mutations per subscriber before it is considered lagging.
const MUTATION_BUFFER: usize = 1024;

/// Batches buffered between a feed producer and its consumer.
const FEED_CAPACITY: usize = 64;

/// A successful mutation, as recorded in the journal.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set { path: String },
    Update { path: String, updates: Vec<FieldUpdate> },
    Delete { path: String },
    Add { path: String },
}

impl StoreOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path } | Self::Update { path, .. } | Self::Delete { path } | Self::Add { path } => path,
        }
    }
}

#[derive(Debug, Clone)]
struct Mutation {
    path: String,
    before: Option<Value>,
    after: Option<Value>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Value>,
    journal: Vec<StoreOp>,
    failing_paths: HashSet<String>,
}

/// In-memory `DocumentStore`.  Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<Mutation>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(MUTATION_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CompanionError::Store("memory store lock poisoned".into()))
    }

    /// Make every mutation of `path`, or of documents directly under it,
    /// fail until cleared.
    pub fn fail_mutations_on(&self, path: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_paths.insert(path.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_paths.clear();
        }
    }

    /// Current payload of a document.
    pub fn document(&self, path: &str) -> Option<Value> {
        self.inner.lock().ok()?.docs.get(path).cloned()
    }

    /// Paths of the documents directly inside `collection`.
    pub fn paths_in(&self, collection: &str) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .docs
                    .keys()
                    .filter(|path| parent_path(path) == collection)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Journal of successful mutations, oldest first.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner
            .lock()
            .map(|inner| inner.journal.clone())
            .unwrap_or_default()
    }

    /// Journal entries touching `path`.
    pub fn operations_on(&self, path: &str) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| op.path() == path)
            .collect()
    }

    pub fn clear_operations(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.journal.clear();
        }
    }

    /// Apply a mutation under the lock and broadcast it to subscribers.
    fn mutate(
        &self,
        path: &str,
        op: StoreOp,
        change: impl FnOnce(Option<&Value>) -> Result<Option<Value>>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.failing_paths.contains(path) || inner.failing_paths.contains(parent_path(path)) {
            return Err(CompanionError::Store(format!("injected failure on {path}")));
        }
        let before = inner.docs.get(path).cloned();
        let after = change(before.as_ref())?;
        match &after {
            Some(value) => {
                inner.docs.insert(path.to_string(), value.clone());
            }
            None => {
                inner.docs.remove(path);
            }
        }
        inner.journal.push(op);
        // Sent under the lock so subscribers observe mutations in order.
        let _ = self.changes.send(Mutation {
            path: path.to_string(),
            before,
            after,
        });
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        let inner = self.lock()?;
        Ok(inner
            .docs
            .get(path)
            .map(|data| Document::new(path, data.clone())))
    }

    #[instrument(skip(self, data))]
    async fn set(&self, path: &str, data: Value) -> Result<()> {
        self.mutate(path, StoreOp::Set { path: path.into() }, |_| Ok(Some(data)))
    }

    #[instrument(skip(self, updates))]
    async fn update(&self, path: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        let op = StoreOp::Update {
            path: path.into(),
            updates: updates.clone(),
        };
        self.mutate(path, op, |before| {
            let mut data = before
                .cloned()
                .ok_or_else(|| CompanionError::NotFound(path.to_string()))?;
            apply_updates(&mut data, &updates);
            Ok(Some(data))
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<()> {
        self.mutate(path, StoreOp::Delete { path: path.into() }, |_| Ok(None))
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let path = format!("{collection}/{}", Uuid::new_v4().simple());
        self.mutate(&path, StoreOp::Add { path: path.clone() }, |_| Ok(Some(data)))?;
        Ok(path)
    }

    async fn query_before(
        &self,
        collection: &str,
        field: &str,
        end_before: i64,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let inner = self.lock()?;
        let mut matching: Vec<(i64, Document)> = inner
            .docs
            .iter()
            .filter(|(path, _)| parent_path(path) == collection)
            .filter_map(|(path, data)| {
                let key = data.get(field).and_then(Value::as_i64)?;
                (key < end_before).then(|| (key, Document::new(path.as_str(), data.clone())))
            })
            .collect();
        matching.sort_by_key(|(key, _)| *key);
        Ok(matching.into_iter().take(limit).map(|(_, doc)| doc).collect())
    }

    async fn subscribe_collection(
        &self,
        collection: &str,
        order_field: &str,
        start_after: i64,
    ) -> Result<ChangeStream> {
        let query = CollectionQuery {
            collection: collection.to_string(),
            order_field: order_field.to_string(),
            start_after,
        };

        // Subscribe and snapshot under one lock so no mutation slips between.
        let (rx, initial) = {
            let inner = self.lock()?;
            let rx = self.changes.subscribe();
            let mut initial: Vec<(i64, Document)> = inner
                .docs
                .iter()
                .filter(|(path, data)| query.matches(path, data))
                .map(|(path, data)| {
                    let key = data.get(&query.order_field).and_then(Value::as_i64).unwrap_or_default();
                    (key, Document::new(path.as_str(), data.clone()))
                })
                .collect();
            initial.sort_by_key(|(key, _)| *key);
            (rx, initial.into_iter().map(|(_, doc)| doc).collect::<Vec<_>>())
        };

        let (tx, stream) = ChangeStream::channel(FEED_CAPACITY);
        debug!(collection, order_field, start_after, "memory collection feed opened");
        tokio::spawn(run_feed(rx, tx, initial, move |mutation, members, batch| {
            query.apply(mutation, members, batch)
        }));
        Ok(stream)
    }

    async fn subscribe_document(&self, path: &str) -> Result<ChangeStream> {
        let (rx, initial) = {
            let inner = self.lock()?;
            let rx = self.changes.subscribe();
            let initial: Vec<Document> = inner
                .docs
                .get(path)
                .map(|data| Document::new(path, data.clone()))
                .into_iter()
                .collect();
            (rx, initial)
        };

        let (tx, stream) = ChangeStream::channel(FEED_CAPACITY);
        let watched = path.to_string();
        debug!(path, "memory document feed opened");
        tokio::spawn(run_feed(rx, tx, initial, move |mutation, members, batch| {
            if mutation.path != watched {
                return;
            }
            match (&mutation.before, &mutation.after) {
                (_, Some(after)) => {
                    let kind = if members.insert(watched.clone()) {
                        ChangeKind::Added
                    } else {
                        ChangeKind::Modified
                    };
                    batch.push(ChangeEvent {
                        kind,
                        document: Document::new(watched.as_str(), after.clone()),
                    });
                }
                (Some(before), None) => {
                    members.remove(&watched);
                    batch.push(ChangeEvent {
                        kind: ChangeKind::Removed,
                        document: Document::new(watched.as_str(), before.clone()),
                    });
                }
                (None, None) => {}
            }
        }));
        Ok(stream)
    }
}

struct CollectionQuery {
    collection: String,
    order_field: String,
    start_after: i64,
}

impl CollectionQuery {
    fn matches(&self, path: &str, data: &Value) -> bool {
        parent_path(path) == self.collection
            && data
                .get(&self.order_field)
                .and_then(Value::as_i64)
                .is_some_and(|key| key > self.start_after)
    }

    fn apply(&self, mutation: &Mutation, members: &mut HashSet<String>, batch: &mut Vec<ChangeEvent>) {
        if parent_path(&mutation.path) != self.collection {
            return;
        }
        match &mutation.after {
            Some(after) if self.matches(&mutation.path, after) => {
                let kind = if members.insert(mutation.path.clone()) {
                    ChangeKind::Added
                } else {
                    ChangeKind::Modified
                };
                batch.push(ChangeEvent {
                    kind,
                    document: Document::new(mutation.path.as_str(), after.clone()),
                });
            }
            _ => {
                if members.remove(&mutation.path) {
                    let data = mutation
                        .before
                        .clone()
                        .or_else(|| mutation.after.clone())
                        .unwrap_or_else(|| Value::Object(Map::new()));
                    batch.push(ChangeEvent {
                        kind: ChangeKind::Removed,
                        document: Document::new(mutation.path.as_str(), data),
                    });
                }
            }
        }
    }
}

/// Producer loop shared by both subscription kinds.
///
/// Mutations already queued when one arrives are folded into the same batch.
async fn run_feed<F>(
    mut rx: broadcast::Receiver<Mutation>,
    mut tx: FeedSender,
    initial: Vec<Document>,
    mut apply: F,
) where
    F: FnMut(&Mutation, &mut HashSet<String>, &mut Vec<ChangeEvent>) + Send + 'static,
{
    let mut members: HashSet<String> = initial.iter().map(|doc| doc.path.clone()).collect();
    if !initial.is_empty() && !tx.send(initial.into_iter().map(ChangeEvent::added).collect()).await {
        return;
    }

    loop {
        let received = tokio::select! {
            _ = tx.stopped() => return,
            received = rx.recv() => received,
        };
        match received {
            Ok(mutation) => {
                let mut batch = Vec::new();
                apply(&mutation, &mut members, &mut batch);
                while let Ok(mutation) = rx.try_recv() {
                    apply(&mutation, &mut members, &mut batch);
                }
                if !batch.is_empty() && !tx.send(batch).await {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "memory feed subscriber lagged");
                let err = CompanionError::Store(format!("change feed lagged, {skipped} changes dropped"));
                if !tx.send_error(err).await {
                    return;
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    async fn next(stream: &mut ChangeStream) -> Vec<ChangeEvent> {
        tokio::time::timeout(Duration::from_secs(1), stream.next_batch())
            .await
            .expect("batch arrived")
            .expect("batch ok")
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryStore::new();
        let err = store
            .update("jobs/missing", vec![FieldUpdate::new("status", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, CompanionError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_before_is_strict_and_ordered() {
        let store = MemoryStore::new();
        store.set("logs/c", json!({"timestamp": 30})).await.unwrap();
        store.set("logs/a", json!({"timestamp": 10})).await.unwrap();
        store.set("logs/b", json!({"timestamp": 20})).await.unwrap();
        store.set("logs/untimed", json!({"message": "x"})).await.unwrap();
        store.set("other/z", json!({"timestamp": 1})).await.unwrap();

        let docs = store.query_before("logs", "timestamp", 30, 10).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        let limited = store.query_before("logs", "timestamp", 100, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "a");
    }

    #[tokio::test]
    async fn collection_feed_skips_history_and_reports_kinds() {
        let store = MemoryStore::new();
        store.set("jobs/old", json!({"created": 100})).await.unwrap();

        let mut stream = store.subscribe_collection("jobs", "created", 100).await.unwrap();

        store.set("jobs/new", json!({"created": 101, "v": 1})).await.unwrap();
        let batch = next(&mut stream).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Added);
        assert_eq!(batch[0].document.id, "new");

        store
            .update("jobs/new", vec![FieldUpdate::new("v", 2)])
            .await
            .unwrap();
        assert_eq!(next(&mut stream).await[0].kind, ChangeKind::Modified);

        store.delete("jobs/new").await.unwrap();
        assert_eq!(next(&mut stream).await[0].kind, ChangeKind::Removed);

        // Changes to historical documents never surface.
        store.delete("jobs/old").await.unwrap();
        store.set("jobs/later", json!({"created": 102})).await.unwrap();
        let batch = next(&mut stream).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].document.id, "later");
    }

    #[tokio::test]
    async fn document_feed_starts_with_current_snapshot() {
        let store = MemoryStore::new();
        store.set("apps/a1", json!({"paused": false})).await.unwrap();

        let mut stream = store.subscribe_document("apps/a1").await.unwrap();
        let first = next(&mut stream).await;
        assert_eq!(first[0].kind, ChangeKind::Added);

        store.set("apps/a1", json!({"paused": true})).await.unwrap();
        let second = next(&mut stream).await;
        assert_eq!(second[0].kind, ChangeKind::Modified);
        assert_eq!(second[0].document.data["paused"], true);
    }

    #[tokio::test]
    async fn injected_failures_block_mutations_without_journaling() {
        let store = MemoryStore::new();
        store.set("jobs/a", json!({"created": 1})).await.unwrap();
        store.fail_mutations_on("jobs/a");

        assert!(store.delete("jobs/a").await.is_err());
        assert!(store.document("jobs/a").is_some());
        assert_eq!(store.operations_on("jobs/a").len(), 1);

        store.clear_failures();
        store.delete("jobs/a").await.unwrap();
        assert!(matches!(
            store.operations_on("jobs/a").last(),
            Some(StoreOp::Delete { .. })
        ));
    }

    #[tokio::test]
    async fn stopped_feed_returns_closed() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe_collection("jobs", "created", 0).await.unwrap();
        stream.stop();
        assert!(stream.next_batch().await.unwrap_err().is_feed_closed());
    }
}
