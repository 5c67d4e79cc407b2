//! Cross-context change propagation.
//!
//! A [`BroadcastHub`] is the process-level stand-in for a named broadcast
//! channel: every storage engine registered under the same collection name
//! sees the events the others commit. Delivery is best effort, a lagging
//! receiver drops old events rather than blocking writers, and ordering is
//! only guaranteed per origin.

use crate::events::ChangeEvent;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Named pub/sub registry shared by sibling storage engines. Cloning is
/// cheap and clones share the underlying channels, so one hub instance
/// injected into several engines forms one broadcast domain.
pub struct BroadcastHub {
    channels: Arc<DashMap<String, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Posts a committed change to every subscriber of the event's
    /// collection name. Events posted to a name nobody listens on are
    /// dropped.
    pub fn post(&self, event: ChangeEvent) {
        if let Some(tx) = self.channels.get(&event.name) {
            let _ = tx.send(event);
        }
    }

    /// Subscribes to a collection name, creating the channel on first use.
    pub fn subscribe(&self, name: impl Into<String>) -> broadcast::Receiver<ChangeEvent> {
        let name = name.into();

        if !self.channels.contains_key(&name) {
            self.channels.retain(|_, sender| sender.receiver_count() > 0);
        }

        self.channels
            .entry(name)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Clone for BroadcastHub {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            capacity: self.capacity,
        }
    }
}
