//! The single-writer storage engine.
//!
//! One engine instance owns the authoritative in-memory document map for a
//! named collection. Mutations are queued over an unbounded channel and
//! drained by a dedicated processor task, one at a time in submission order,
//! so operations never interleave. Committed changes fan out to local
//! subscribers, to sibling contexts through the broadcast hub, and to the
//! persistence adapter through a trailing debounce.

use crate::error::{Result, RippleError};
use crate::events::{Change, ChangeEvent};
use crate::query::{self, Criteria};
use crate::storage::adapter::StorageAdapter;
use crate::storage::operation::Operation;
use crate::sync::BroadcastHub;
use crate::types::{Document, FindOptions, PartialDocument, generate_id};
use crate::update::{self, UpdateOperators, UpdateOutcome};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Trailing delay before applied mutations are written to the adapter.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Engine lifecycle status: `Loading -> Ready <-> Working`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    Ready,
    Working,
}

type DocumentMap = Arc<RwLock<IndexMap<String, Document>>>;

pub struct StorageEngine {
    name: String,
    origin: String,
    documents: DocumentMap,
    operations: mpsc::UnboundedSender<Operation>,
    status: watch::Receiver<Status>,
    changes: broadcast::Sender<ChangeEvent>,
    listener: JoinHandle<()>,
}

impl StorageEngine {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn StorageAdapter>, hub: BroadcastHub) -> Self {
        Self::with_debounce(name, adapter, hub, DEFAULT_PERSIST_DEBOUNCE)
    }

    pub fn with_debounce(
        name: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        hub: BroadcastHub,
        debounce: Duration,
    ) -> Self {
        let name = name.into();
        let origin = generate_id();
        let documents: DocumentMap = Arc::new(RwLock::new(IndexMap::new()));
        let (status_tx, status_rx) = watch::channel(Status::Loading);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (operations, inbox) = mpsc::unbounded_channel();

        let processor = Processor {
            name: name.clone(),
            origin: origin.clone(),
            adapter,
            documents: Arc::clone(&documents),
            status: status_tx,
            changes: changes.clone(),
            hub: hub.clone(),
            debounce,
            save_task: None,
        };
        tokio::spawn(processor.run(inbox));

        // Subscribe before returning so no sibling commit can slip past
        // while the listener task is still being scheduled.
        let foreign_inbox = hub.subscribe(&name);
        let listener = tokio::spawn(foreign_listener(
            name.clone(),
            origin.clone(),
            foreign_inbox,
            Arc::clone(&documents),
            changes.clone(),
        ));

        Self {
            name,
            origin,
            documents,
            operations,
            status: status_rx,
            changes,
            listener,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique id of this engine instance within its broadcast domain.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Subscribes to this engine's change stream. Foreign events re-emitted
    /// from sibling contexts arrive on the same stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Suspends until the initial adapter load has completed. Reads gate on
    /// this; they do not wait for the mutation queue.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        while *status.borrow_and_update() == Status::Loading {
            if status.changed().await.is_err() {
                return Err(RippleError::EngineClosed);
            }
        }
        Ok(())
    }

    /// Enqueues an insert and returns the receiver resolving when that
    /// operation is processed. Used by batch submitters that want to queue
    /// several operations before awaiting any of them.
    pub fn enqueue_insert(&self, document: PartialDocument) -> oneshot::Receiver<Result<Document>> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::Insert { document, responder });
        receiver
    }

    pub fn enqueue_update(
        &self,
        id: impl Into<String>,
        criteria: Criteria,
        operators: UpdateOperators,
    ) -> oneshot::Receiver<Result<UpdateOutcome>> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::Update {
            id: id.into(),
            criteria,
            operators,
            responder,
        });
        receiver
    }

    pub async fn insert(&self, document: PartialDocument) -> Result<Document> {
        resolve(self.enqueue_insert(document)).await
    }

    /// Inserts a batch as one queued operation. The batch commits a single
    /// `InsertMany` change; individual failures land in their slot of the
    /// returned outcomes.
    pub async fn insert_many(
        &self,
        documents: Vec<PartialDocument>,
    ) -> Result<Vec<Result<Document>>> {
        let (responder, receiver) = oneshot::channel();
        let _ = self
            .operations
            .send(Operation::InsertMany { documents, responder });
        receiver.await.map_err(|_| RippleError::EngineClosed)
    }

    pub async fn update(
        &self,
        id: impl Into<String>,
        criteria: Criteria,
        operators: UpdateOperators,
    ) -> Result<UpdateOutcome> {
        resolve(self.enqueue_update(id, criteria, operators)).await
    }

    /// Applies the same operators to every listed id as one queued
    /// operation, committing a single `UpdateMany` change.
    pub async fn update_many(
        &self,
        ids: Vec<String>,
        criteria: Criteria,
        operators: UpdateOperators,
    ) -> Result<Vec<Result<UpdateOutcome>>> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::UpdateMany {
            ids,
            criteria,
            operators,
            responder,
        });
        receiver.await.map_err(|_| RippleError::EngineClosed)
    }

    pub async fn replace(&self, id: impl Into<String>, document: PartialDocument) -> Result<Document> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::Replace {
            id: id.into(),
            document,
            responder,
        });
        resolve(receiver).await
    }

    /// Deletes by id, resolving with the removed document if one existed.
    pub async fn delete(&self, id: impl Into<String>) -> Result<Option<Document>> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::Delete {
            id: id.into(),
            responder,
        });
        resolve(receiver).await
    }

    /// Clears the in-memory map and the adapter's persisted data, emitting a
    /// flush event. Unlike regular mutations the adapter write is awaited,
    /// not debounced.
    pub async fn flush(&self) -> Result<()> {
        let (responder, receiver) = oneshot::channel();
        let _ = self.operations.send(Operation::Flush { responder });
        resolve(receiver).await
    }

    /// Snapshot of every stored document in insertion order.
    pub async fn documents(&self) -> Result<Vec<Document>> {
        self.wait_ready().await?;
        Ok(self.documents.read().await.values().cloned().collect())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.wait_ready().await?;
        Ok(self.documents.read().await.get(id).cloned())
    }

    pub async fn has(&self, id: &str) -> Result<bool> {
        self.wait_ready().await?;
        Ok(self.documents.read().await.contains_key(id))
    }

    pub async fn find(&self, criteria: &Criteria, options: &FindOptions) -> Result<Vec<Document>> {
        self.wait_ready().await?;
        let map = self.documents.read().await;
        Ok(query::find_all(map.values(), criteria, options))
    }

    pub async fn count(&self, criteria: &Criteria) -> Result<usize> {
        self.wait_ready().await?;
        let map = self.documents.read().await;
        Ok(map.values().filter(|doc| criteria.matches(doc)).count())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn resolve<T>(receiver: oneshot::Receiver<Result<T>>) -> Result<T> {
    receiver.await.map_err(|_| RippleError::EngineClosed)?
}

/// The single-writer loop. Owns the status machine and the debounced
/// persistence handle; ends when the engine (the only sender) is dropped.
struct Processor {
    name: String,
    origin: String,
    adapter: Arc<dyn StorageAdapter>,
    documents: DocumentMap,
    status: watch::Sender<Status>,
    changes: broadcast::Sender<ChangeEvent>,
    hub: BroadcastHub,
    debounce: Duration,
    save_task: Option<JoinHandle<()>>,
}

impl Processor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Operation>) {
        match self.adapter.get(&self.name).await {
            Ok(persisted) => {
                let mut map = self.documents.write().await;
                for document in persisted {
                    map.insert(document.id.clone(), document);
                }
            }
            Err(err) => {
                log::warn!("initial load failed for '{}': {err}", self.name);
            }
        }
        let _ = self.status.send(Status::Ready);

        // Operations queued while loading were buffered by the channel and
        // drain here in submission order.
        while let Some(operation) = inbox.recv().await {
            let _ = self.status.send(Status::Working);
            self.execute(operation).await;
            let _ = self.status.send(Status::Ready);
        }
    }

    async fn execute(&mut self, operation: Operation) {
        log::trace!("'{}' processing {} operation", self.name, operation.kind());
        match operation {
            Operation::Insert { document, responder } => {
                let _ = responder.send(self.insert(document).await);
            }
            Operation::InsertMany {
                documents,
                responder,
            } => {
                let _ = responder.send(self.insert_many(documents).await);
            }
            Operation::Update {
                id,
                criteria,
                operators,
                responder,
            } => {
                let _ = responder.send(self.update(&id, &criteria, &operators).await);
            }
            Operation::UpdateMany {
                ids,
                criteria,
                operators,
                responder,
            } => {
                let _ = responder.send(self.update_many(ids, &criteria, &operators).await);
            }
            Operation::Replace {
                id,
                document,
                responder,
            } => {
                let _ = responder.send(self.replace(&id, document).await);
            }
            Operation::Delete { id, responder } => {
                let _ = responder.send(self.delete(&id).await);
            }
            Operation::Flush { responder } => {
                let _ = responder.send(self.flush().await);
            }
        }
    }

    async fn insert(&mut self, document: PartialDocument) -> Result<Document> {
        let document = document.into_document(generate_id);
        {
            let mut map = self.documents.write().await;
            if map.contains_key(&document.id) {
                return Err(RippleError::DuplicateDocument(
                    document.id.clone(),
                    self.name.clone(),
                ));
            }
            map.insert(document.id.clone(), document.clone());
        }
        self.commit(Change::InsertOne(document.clone()));
        Ok(document)
    }

    async fn insert_many(&mut self, documents: Vec<PartialDocument>) -> Vec<Result<Document>> {
        let mut results = Vec::with_capacity(documents.len());
        let mut inserted = Vec::new();
        {
            let mut map = self.documents.write().await;
            for document in documents {
                let document = document.into_document(generate_id);
                if map.contains_key(&document.id) {
                    results.push(Err(RippleError::DuplicateDocument(
                        document.id.clone(),
                        self.name.clone(),
                    )));
                    continue;
                }
                map.insert(document.id.clone(), document.clone());
                inserted.push(document.clone());
                results.push(Ok(document));
            }
        }
        if !inserted.is_empty() {
            self.commit(Change::InsertMany(inserted));
        }
        results
    }

    async fn update(
        &mut self,
        id: &str,
        criteria: &Criteria,
        operators: &UpdateOperators,
    ) -> Result<UpdateOutcome> {
        let current = {
            let map = self.documents.read().await;
            map.get(id).cloned()
        };
        let Some(current) = current else {
            return Err(RippleError::DocumentNotFound(format!("{{id: {id}}}")));
        };

        let mut outcome = update::apply(&current, criteria, operators)?;
        if outcome.modified {
            outcome.document.meta = outcome.document.meta.touched();
            self.documents
                .write()
                .await
                .insert(id.to_string(), outcome.document.clone());
            self.commit(Change::UpdateOne(outcome.document.clone()));
        }
        Ok(outcome)
    }

    async fn update_many(
        &mut self,
        ids: Vec<String>,
        criteria: &Criteria,
        operators: &UpdateOperators,
    ) -> Vec<Result<UpdateOutcome>> {
        let mut results = Vec::with_capacity(ids.len());
        let mut modified = Vec::new();
        for id in ids {
            let current = {
                let map = self.documents.read().await;
                map.get(&id).cloned()
            };
            let Some(current) = current else {
                results.push(Err(RippleError::DocumentNotFound(format!("{{id: {id}}}"))));
                continue;
            };
            match update::apply(&current, criteria, operators) {
                Ok(mut outcome) => {
                    if outcome.modified {
                        outcome.document.meta = outcome.document.meta.touched();
                        self.documents
                            .write()
                            .await
                            .insert(id, outcome.document.clone());
                        modified.push(outcome.document.clone());
                    }
                    results.push(Ok(outcome));
                }
                Err(err) => results.push(Err(err)),
            }
        }
        if !modified.is_empty() {
            self.commit(Change::UpdateMany(modified));
        }
        results
    }

    async fn replace(&mut self, id: &str, document: PartialDocument) -> Result<Document> {
        let mut map = self.documents.write().await;
        let Some(current) = map.get(id) else {
            return Err(RippleError::DocumentNotFound(format!("{{id: {id}}}")));
        };
        let replacement = Document {
            id: id.to_string(),
            data: document.data,
            meta: current.meta.touched(),
        };
        map.insert(id.to_string(), replacement.clone());
        drop(map);
        self.commit(Change::UpdateOne(replacement.clone()));
        Ok(replacement)
    }

    async fn delete(&mut self, id: &str) -> Result<Option<Document>> {
        let removed = self.documents.write().await.shift_remove(id);
        if let Some(document) = &removed {
            self.commit(Change::Remove(vec![document.clone()]));
        }
        Ok(removed)
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(pending) = self.save_task.take() {
            pending.abort();
        }
        self.documents.write().await.clear();
        let result = self.adapter.flush(&self.name).await;

        let event = ChangeEvent::new(&self.name, &self.origin, Change::Flush);
        let _ = self.changes.send(event.clone());
        self.hub.post(event);
        result
    }

    /// Publishes a committed change locally and to sibling contexts, then
    /// (re)arms the trailing persistence debounce.
    fn commit(&mut self, change: Change) {
        let event = ChangeEvent::new(&self.name, &self.origin, change);
        let _ = self.changes.send(event.clone());
        self.hub.post(event);
        self.schedule_save();
    }

    fn schedule_save(&mut self) {
        if let Some(pending) = self.save_task.take() {
            pending.abort();
        }
        let adapter = Arc::clone(&self.adapter);
        let documents = Arc::clone(&self.documents);
        let name = self.name.clone();
        let delay = self.debounce;
        self.save_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let snapshot: Vec<Document> = documents.read().await.values().cloned().collect();
            if let Err(err) = adapter.set(&name, &snapshot).await {
                log::warn!("debounced persist failed for '{name}': {err}");
            }
        }));
    }
}

/// Applies change events committed by sibling contexts to the local map and
/// re-emits them on the local change stream. Foreign events are already
/// committed and persisted at their origin; they are never re-queued or
/// re-persisted here.
async fn foreign_listener(
    name: String,
    origin: String,
    mut inbox: broadcast::Receiver<ChangeEvent>,
    documents: DocumentMap,
    changes: broadcast::Sender<ChangeEvent>,
) {
    loop {
        match inbox.recv().await {
            Ok(event) => {
                if event.origin == origin {
                    continue;
                }
                apply_foreign(&documents, &event.change).await;
                let _ = changes.send(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("'{name}' dropped {skipped} foreign change events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn apply_foreign(documents: &DocumentMap, change: &Change) {
    let mut map = documents.write().await;
    match change {
        Change::InsertOne(_)
        | Change::InsertMany(_)
        | Change::UpdateOne(_)
        | Change::UpdateMany(_) => {
            for document in change.documents() {
                map.insert(document.id.clone(), document.clone());
            }
        }
        Change::Remove(removed) => {
            for document in removed {
                map.shift_remove(&document.id);
            }
        }
        Change::Flush => map.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::adapter::MemoryAdapter;
    use serde_json::json;

    fn engine(name: &str) -> StorageEngine {
        StorageEngine::with_debounce(
            name,
            Arc::new(MemoryAdapter::new()),
            BroadcastHub::default(),
            Duration::from_millis(20),
        )
    }

    fn payload(data: serde_json::Value) -> PartialDocument {
        PartialDocument::from_value(data).unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_find_by_id() {
        let engine = engine("users");
        let inserted = engine.insert(payload(json!({"name": "Alice"}))).await.unwrap();

        let found = engine.find_by_id(&inserted.id).await.unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(found.meta.created_at, found.meta.updated_at);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let engine = engine("users");
        engine
            .insert(payload(json!({"id": "u1", "name": "Alice"})))
            .await
            .unwrap();
        let result = engine.insert(payload(json!({"id": "u1", "name": "Bob"}))).await;
        assert!(matches!(result, Err(RippleError::DuplicateDocument(..))));

        // The failed operation did not corrupt the stored document.
        let stored = engine.find_by_id("u1").await.unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&crate::types::Value::from("Alice")));
    }

    #[tokio::test]
    async fn test_update_missing_rejected() {
        let engine = engine("users");
        let result = engine
            .update("ghost", Criteria::empty(), UpdateOperators::new().set("a", 1))
            .await;
        assert!(matches!(result, Err(RippleError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_operations_resolve_in_fifo_order() {
        let engine = engine("counters");
        engine
            .insert(payload(json!({"id": "c", "n": 0, "trace": []})))
            .await
            .unwrap();

        // Submit a burst without awaiting, then await in submission order.
        let receivers: Vec<_> = (0..32)
            .map(|i| {
                engine.enqueue_update(
                    "c",
                    Criteria::empty(),
                    UpdateOperators::new().inc("n", 1).push("trace", i as i64),
                )
            })
            .collect();
        for receiver in receivers {
            receiver.await.unwrap().unwrap();
        }

        let doc = engine.find_by_id("c").await.unwrap().unwrap();
        assert_eq!(doc.get("n"), Some(&crate::types::Value::Int(32)));
        let trace = doc.get("trace").unwrap().as_array().unwrap();
        let order: Vec<i64> = trace
            .iter()
            .map(|v| match v {
                crate::types::Value::Int(i) => *i,
                _ => panic!("unexpected trace value"),
            })
            .collect();
        assert_eq!(order, (0..32).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_failed_operation_does_not_halt_queue() {
        let engine = engine("users");
        engine
            .insert(payload(json!({"id": "u1", "tags": "not-an-array"})))
            .await
            .unwrap();

        let failing = engine.enqueue_update(
            "u1",
            Criteria::empty(),
            UpdateOperators::new().push("tags", "x"),
        );
        let following = engine.enqueue_update(
            "u1",
            Criteria::empty(),
            UpdateOperators::new().set("name", "Alice"),
        );

        assert!(matches!(
            failing.await.unwrap(),
            Err(RippleError::NotArray(_))
        ));
        assert!(following.await.unwrap().unwrap().modified);
    }

    #[tokio::test]
    async fn test_debounced_persistence_coalesces_burst() {
        let adapter = Arc::new(MemoryAdapter::new());
        let engine = StorageEngine::with_debounce(
            "notes",
            Arc::clone(&adapter) as Arc<dyn StorageAdapter>,
            BroadcastHub::default(),
            Duration::from_millis(30),
        );

        for i in 0..5 {
            engine
                .insert(payload(json!({"id": format!("n{i}")})))
                .await
                .unwrap();
        }
        // Before the trailing delay elapses nothing is persisted.
        assert!(adapter.get("notes").await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(adapter.get("notes").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_initial_load_from_adapter() {
        let adapter = Arc::new(MemoryAdapter::new());
        let seeded = payload(json!({"id": "u1", "name": "Alice"})).into_document(generate_id);
        adapter.set("users", &[seeded]).await.unwrap();

        let engine = StorageEngine::with_debounce(
            "users",
            Arc::clone(&adapter) as Arc<dyn StorageAdapter>,
            BroadcastHub::default(),
            Duration::from_millis(20),
        );
        let found = engine.find_by_id("u1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_flush_clears_memory_and_adapter() {
        let adapter = Arc::new(MemoryAdapter::new());
        let engine = StorageEngine::with_debounce(
            "users",
            Arc::clone(&adapter) as Arc<dyn StorageAdapter>,
            BroadcastHub::default(),
            Duration::from_millis(10),
        );
        engine.insert(payload(json!({"id": "u1"}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(adapter.get("users").await.unwrap().len(), 1);

        engine.flush().await.unwrap();
        assert!(engine.find_by_id("u1").await.unwrap().is_none());
        assert!(adapter.get("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_events_visible_without_repersist() {
        let hub = BroadcastHub::default();
        let adapter_a = Arc::new(MemoryAdapter::new());
        let adapter_b = Arc::new(MemoryAdapter::new());
        let a = StorageEngine::with_debounce(
            "users",
            Arc::clone(&adapter_a) as Arc<dyn StorageAdapter>,
            hub.clone(),
            Duration::from_millis(10),
        );
        let b = StorageEngine::with_debounce(
            "users",
            Arc::clone(&adapter_b) as Arc<dyn StorageAdapter>,
            hub.clone(),
            Duration::from_millis(10),
        );
        b.wait_ready().await.unwrap();

        let mut b_changes = b.subscribe();
        a.insert(payload(json!({"id": "u1", "name": "Alice"})))
            .await
            .unwrap();

        // The sibling re-emits the committed change on its own stream.
        let event = b_changes.recv().await.unwrap();
        assert_eq!(event.origin, a.origin());
        assert!(b.find_by_id("u1").await.unwrap().is_some());

        // Only the origin persists it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(adapter_a.get("users").await.unwrap().len(), 1);
        assert!(adapter_b.get("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let engine = engine("users");
        engine.wait_ready().await.unwrap();
        assert_ne!(engine.status(), Status::Loading);
    }
}
