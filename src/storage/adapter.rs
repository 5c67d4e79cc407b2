//! Persistence adapter contract.
//!
//! Backends are external to the engine; they only need to load, replace and
//! drop the document set for a named collection. Adapter failures surface as
//! operation-level rejections, never as engine faults.

use crate::error::{Result, RippleError};
use crate::types::Document;
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Loads every persisted document for the named collection.
    async fn get(&self, name: &str) -> Result<Vec<Document>>;

    /// Replaces the persisted document set for the named collection.
    async fn set(&self, name: &str, documents: &[Document]) -> Result<()>;

    /// Drops all persisted data for the named collection.
    async fn flush(&self, name: &str) -> Result<()>;
}

/// In-memory adapter used for tests and default wiring. Documents are held
/// as serialized JSON per collection name, so loads hand back independent
/// copies the way a real backend would.
#[derive(Default)]
pub struct MemoryAdapter {
    collections: DashMap<String, String>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, name: &str) -> Result<Vec<Document>> {
        match self.collections.get(name) {
            Some(raw) => {
                serde_json::from_str(raw.value()).map_err(RippleError::Serialization)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn set(&self, name: &str, documents: &[Document]) -> Result<()> {
        let raw = serde_json::to_string(documents)?;
        self.collections.insert(name.to_string(), raw);
        Ok(())
    }

    async fn flush(&self, name: &str) -> Result<()> {
        self.collections.remove(name);
        Ok(())
    }
}
