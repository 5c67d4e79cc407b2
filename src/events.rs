use crate::types::Document;
use serde::{Deserialize, Serialize};

/// What changed in a collection, carrying the post-application document(s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change {
    InsertOne(Document),
    InsertMany(Vec<Document>),
    UpdateOne(Document),
    UpdateMany(Vec<Document>),
    Remove(Vec<Document>),
    Flush,
}

impl Change {
    pub fn is_flush(&self) -> bool {
        matches!(self, Change::Flush)
    }

    /// The documents the change touched, empty for a flush.
    pub fn documents(&self) -> &[Document] {
        match self {
            Change::InsertOne(doc) | Change::UpdateOne(doc) => std::slice::from_ref(doc),
            Change::InsertMany(docs) | Change::UpdateMany(docs) | Change::Remove(docs) => docs,
            Change::Flush => &[],
        }
    }
}

/// The unit delivered to local subscribers and broadcast to sibling contexts
/// sharing the same collection name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Logical collection name.
    pub name: String,
    /// Unique id of the originating storage engine instance, used by
    /// receivers to drop their own echoes.
    pub origin: String,
    pub change: Change,
}

impl ChangeEvent {
    pub fn new(name: impl Into<String>, origin: impl Into<String>, change: Change) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            change,
        }
    }
}
