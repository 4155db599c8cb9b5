use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// In-process change feed: one broadcast channel per watched key. Schedule
/// events are keyed by the resource (instructor/vehicle) id, form events
/// by the form id. Used by tests today and by push surfaces later.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a key. Creates the channel if needed.
    pub fn subscribe(&self, key: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the resource is deleted).
    pub fn remove(&self, key: &Ulid) {
        self.channels.remove(key);
    }
}
