//! Live query observation.
//!
//! An observer keeps a materialized result set for one criteria in sync with
//! the collection's change stream and delivers recomputed, ordered result
//! lists to a caller supplied sink. Relevant events are coalesced through a
//! zero-delay trailing debounce: a burst of changes produces a single
//! requery once the stream goes quiet. Flush events bypass the debounce and
//! deliver an empty result immediately.

pub mod state;

use crate::query;
use crate::storage::StorageEngine;
use crate::types::{Document, FindOptions};
use state::QueryState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Handle for an active observation. Unsubscribing (or dropping) stops the
/// listener; no further deliveries happen afterwards.
pub struct Observer {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl Observer {
    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

pub(crate) fn observe<F>(
    storage: Arc<StorageEngine>,
    criteria: crate::query::Criteria,
    options: FindOptions,
    on_change: F,
) -> Observer
where
    F: Fn(Vec<Document>) + Send + Sync + 'static,
{
    let active = Arc::new(AtomicBool::new(true));
    let guard = Arc::clone(&active);
    let deliver = move |documents: Vec<Document>| {
        if guard.load(Ordering::SeqCst) {
            on_change(documents);
        }
    };

    let task = tokio::spawn(async move {
        // Subscribe before the initial query so no commit lands between the
        // snapshot and the stream.
        let mut events = storage.subscribe();
        let Ok(initial) = storage.find(&criteria, &FindOptions::default()).await else {
            return;
        };
        let mut state = QueryState::new(criteria.clone());
        state.seed(initial);
        deliver(query::apply_options(state.documents(), &options));

        let mut pending = false;
        let mut resync = false;
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => {
                        if event.change.is_flush() {
                            pending = false;
                            resync = false;
                            state.clear();
                            deliver(Vec::new());
                        } else if state.apply(&event.change) {
                            pending = true;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {
                        // Dropped events; rebuild the set from storage on
                        // the next requery.
                        pending = true;
                        resync = true;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = std::future::ready(()), if pending => {
                    pending = false;
                    if resync {
                        resync = false;
                        if let Ok(documents) =
                            storage.find(&criteria, &FindOptions::default()).await
                        {
                            state.seed(documents);
                        }
                    }
                    deliver(query::apply_options(state.documents(), &options));
                }
            }
        }
    });

    Observer { task, active }
}

pub(crate) fn observe_one<F>(
    storage: Arc<StorageEngine>,
    criteria: crate::query::Criteria,
    on_change: F,
) -> Observer
where
    F: Fn(Option<Document>) + Send + Sync + 'static,
{
    observe(storage, criteria, FindOptions::default(), move |documents| {
        on_change(documents.into_iter().next());
    })
}
