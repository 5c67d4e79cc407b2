//! Database composition root.
//!
//! A [`Ripple`] instance ties one persistence adapter and one broadcast hub
//! to a set of named collections. Collections are created lazily and cached,
//! so repeated lookups share the same storage engine. Two instances built
//! over the same hub behave as sibling contexts: their collections converge
//! through broadcast change events.

use crate::collection::Collection;
use crate::error::Result;
use crate::storage::{DEFAULT_PERSIST_DEBOUNCE, MemoryAdapter, StorageAdapter};
use crate::sync::BroadcastHub;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Ripple {
    adapter: Arc<dyn StorageAdapter>,
    hub: BroadcastHub,
    debounce: Duration,
    collections: DashMap<String, Collection>,
}

impl Ripple {
    /// Opens a database over the given adapter with its own broadcast hub.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_hub(adapter, BroadcastHub::default())
    }

    /// Opens an in-memory database. Nothing survives the instance.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAdapter::new()))
    }

    /// Opens a database over the given adapter, joining an existing
    /// broadcast domain.
    pub fn with_hub(adapter: Arc<dyn StorageAdapter>, hub: BroadcastHub) -> Self {
        Self {
            adapter,
            hub,
            debounce: DEFAULT_PERSIST_DEBOUNCE,
            collections: DashMap::new(),
        }
    }

    /// Overrides the trailing persistence delay for collections created
    /// after this call.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Returns the named collection, creating and caching it on first use.
    pub fn collection(&self, name: &str) -> Collection {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Collection::with_debounce(
                    name,
                    Arc::clone(&self.adapter),
                    self.hub.clone(),
                    self.debounce,
                )
            })
            .clone()
    }

    /// Flushes every collection opened through this instance.
    pub async fn flush_all(&self) -> Result<()> {
        let collections: Vec<Collection> = self
            .collections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for collection in collections {
            collection.flush().await?;
        }
        Ok(())
    }
}
