use crate::error::Result;
use crate::query::Criteria;
use crate::types::{Document, PartialDocument};
use crate::update::{UpdateOperators, UpdateOutcome};
use tokio::sync::oneshot;

/// A queued unit of work. Each operation carries the channel that resolves
/// its caller's future when the engine processes it, not when the whole
/// queue drains.
pub enum Operation {
    Insert {
        document: PartialDocument,
        responder: oneshot::Sender<Result<Document>>,
    },
    /// Whole batch in one queue slot, so it commits as a single
    /// `InsertMany` change with per-item outcomes.
    InsertMany {
        documents: Vec<PartialDocument>,
        responder: oneshot::Sender<Vec<Result<Document>>>,
    },
    Update {
        id: String,
        criteria: Criteria,
        operators: UpdateOperators,
        responder: oneshot::Sender<Result<UpdateOutcome>>,
    },
    UpdateMany {
        ids: Vec<String>,
        criteria: Criteria,
        operators: UpdateOperators,
        responder: oneshot::Sender<Vec<Result<UpdateOutcome>>>,
    },
    Replace {
        id: String,
        document: PartialDocument,
        responder: oneshot::Sender<Result<Document>>,
    },
    Delete {
        id: String,
        responder: oneshot::Sender<Result<Option<Document>>>,
    },
    Flush {
        responder: oneshot::Sender<Result<()>>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::InsertMany { .. } => "insert_many",
            Operation::Update { .. } => "update",
            Operation::UpdateMany { .. } => "update_many",
            Operation::Replace { .. } => "replace",
            Operation::Delete { .. } => "delete",
            Operation::Flush { .. } => "flush",
        }
    }
}
