//! The public read/write facade over a storage engine.
//!
//! A collection shapes typed result objects, targets updates by criteria
//! before delegating to the engine by id, and exposes the cursor read path
//! and the live observation entry points. Batch operations occupy a single
//! slot in the engine queue and commit as one batch change event.

use crate::error::{Result, RippleError};
use crate::events::ChangeEvent;
use crate::observe::{self, Observer};
use crate::query::Criteria;
use crate::storage::{StorageAdapter, StorageEngine};
use crate::sync::BroadcastHub;
use crate::types::{Document, FindOptions, PartialDocument};
use crate::update::UpdateOperators;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

/// Aggregated outcome of an `insert_many`. Individual failures land in
/// `errors` instead of failing the batch.
#[derive(Debug, Default)]
pub struct InsertManyResult {
    pub inserted_count: usize,
    pub inserted_ids: Vec<String>,
    pub errors: Vec<RippleError>,
}

impl InsertManyResult {
    pub fn acknowledged(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Aggregated outcome of an update or replace. A criteria matching nothing
/// is reported through `errors`, not by failing the call.
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub matched_count: usize,
    pub modified_count: usize,
    pub errors: Vec<RippleError>,
}

impl UpdateResult {
    pub fn acknowledged(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RemoveResult {
    pub removed_count: usize,
}

#[derive(Clone)]
pub struct Collection {
    name: String,
    storage: Arc<StorageEngine>,
}

impl Collection {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn StorageAdapter>, hub: BroadcastHub) -> Self {
        let name = name.into();
        let storage = Arc::new(StorageEngine::new(&name, adapter, hub));
        Self { name, storage }
    }

    pub fn with_debounce(
        name: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        hub: BroadcastHub,
        debounce: Duration,
    ) -> Self {
        let name = name.into();
        let storage = Arc::new(StorageEngine::with_debounce(&name, adapter, hub, debounce));
        Self { name, storage }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Subscribes to the raw change stream, including changes committed by
    /// sibling contexts.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.storage.subscribe()
    }

    pub async fn insert_one(&self, document: PartialDocument) -> Result<InsertOneResult> {
        let inserted = self.storage.insert(document).await?;
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: inserted.id,
        })
    }

    /// Inserts a batch of documents, committed as one `InsertMany` change.
    /// Individual failures land in the result's errors instead of failing
    /// the batch.
    pub async fn insert_many(&self, documents: Vec<PartialDocument>) -> InsertManyResult {
        let mut result = InsertManyResult::default();
        match self.storage.insert_many(documents).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok(document) => {
                            result.inserted_count += 1;
                            result.inserted_ids.push(document.id);
                        }
                        Err(err) => result.errors.push(err),
                    }
                }
            }
            Err(err) => result.errors.push(err),
        }
        result
    }

    /// Updates the first document matching the criteria. A criteria that
    /// matches nothing reports a [`RippleError::DocumentNotFound`] in the
    /// result's errors.
    pub async fn update_one(
        &self,
        criteria: Criteria,
        operators: UpdateOperators,
    ) -> Result<UpdateResult> {
        let Some(target) = self.find_one(&criteria, &FindOptions::default()).await? else {
            return Ok(UpdateResult {
                errors: vec![RippleError::DocumentNotFound(criteria.raw().to_string())],
                ..UpdateResult::default()
            });
        };
        let receiver = self.storage.enqueue_update(target.id, criteria, operators);
        let mut result = UpdateResult {
            matched_count: 1,
            ..UpdateResult::default()
        };
        match receiver.await.map_err(|_| RippleError::EngineClosed) {
            Ok(Ok(outcome)) => result.modified_count += usize::from(outcome.modified),
            Ok(Err(err)) | Err(err) => result.errors.push(err),
        }
        Ok(result)
    }

    /// Updates every document matching the criteria. The batch occupies one
    /// queue slot and commits as a single `UpdateMany` change.
    pub async fn update_many(
        &self,
        criteria: Criteria,
        operators: UpdateOperators,
    ) -> Result<UpdateResult> {
        let targets = self.find(&criteria, &FindOptions::default()).await?;
        let ids: Vec<String> = targets.into_iter().map(|document| document.id).collect();
        let mut result = UpdateResult {
            matched_count: ids.len(),
            ..UpdateResult::default()
        };
        for outcome in self.storage.update_many(ids, criteria, operators).await? {
            match outcome {
                Ok(outcome) => result.modified_count += usize::from(outcome.modified),
                Err(err) => result.errors.push(err),
            }
        }
        Ok(result)
    }

    /// Replaces the first document matching the criteria, keeping its id
    /// and creation timestamp. A criteria that matches nothing reports a
    /// [`RippleError::DocumentNotFound`] in the result's errors, like
    /// [`Collection::update_one`].
    pub async fn replace_one(
        &self,
        criteria: Criteria,
        document: PartialDocument,
    ) -> Result<UpdateResult> {
        let Some(target) = self.find_one(&criteria, &FindOptions::default()).await? else {
            return Ok(UpdateResult {
                errors: vec![RippleError::DocumentNotFound(criteria.raw().to_string())],
                ..UpdateResult::default()
            });
        };
        let mut result = UpdateResult {
            matched_count: 1,
            ..UpdateResult::default()
        };
        match self.storage.replace(target.id, document).await {
            Ok(_) => result.modified_count += 1,
            Err(err) => result.errors.push(err),
        }
        Ok(result)
    }

    /// Deletes a document by id. Deleting a missing id resolves with a zero
    /// count rather than erroring.
    pub async fn delete(&self, id: &str) -> Result<RemoveResult> {
        let removed = self.storage.delete(id).await?;
        Ok(RemoveResult {
            removed_count: usize::from(removed.is_some()),
        })
    }

    /// Optimized single-key lookup that skips the criteria matcher and goes
    /// straight to the document map.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.storage.find_by_id(id).await
    }

    pub async fn has(&self, id: &str) -> Result<bool> {
        self.storage.has(id).await
    }

    pub async fn find(&self, criteria: &Criteria, options: &FindOptions) -> Result<Vec<Document>> {
        self.storage.find(criteria, options).await
    }

    pub async fn find_one(
        &self,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> Result<Option<Document>> {
        let documents = self.storage.find(criteria, options).await?;
        Ok(documents.into_iter().next())
    }

    pub async fn count(&self, criteria: &Criteria) -> Result<usize> {
        self.storage.count(criteria).await
    }

    /// Observes the criteria as a live query. The sink receives the initial
    /// result set and a recomputed list after every relevant change.
    pub fn observe<F>(&self, criteria: Criteria, options: FindOptions, on_change: F) -> Observer
    where
        F: Fn(Vec<Document>) + Send + Sync + 'static,
    {
        observe::observe(Arc::clone(&self.storage), criteria, options, on_change)
    }

    /// Observes the first document matching the criteria.
    pub fn observe_one<F>(&self, criteria: Criteria, on_change: F) -> Observer
    where
        F: Fn(Option<Document>) + Send + Sync + 'static,
    {
        observe::observe_one(Arc::clone(&self.storage), criteria, on_change)
    }

    /// Removes every document from the collection and its persisted data.
    pub async fn flush(&self) -> Result<()> {
        self.storage.flush().await
    }
}
