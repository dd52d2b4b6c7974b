//! Fan-out of [`IndexEvent`]s to subscribers.
//!
//! The reconciler emits from its own thread and from the delayed notice
//! thread, so delivery never holds the registry lock: a subscriber may
//! unsubscribe itself or subscribe another while an event is being handled.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use log::warn;

use super::IndexEvent;

pub type SubscriptionId = u64;

/// Subscriber callback. Runs on the emitting thread.
pub type EventCallback = Arc<dyn Fn(&IndexEvent) + Send + Sync>;

/// Subscribers in the order they subscribed.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<IndexMap<SubscriptionId, EventCallback>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscribers.write().unwrap().insert(id, callback);
        id
    }

    /// Returns `false` for an id that is not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().unwrap().shift_remove(&id).is_some()
    }

    /// Deliver `event` to every subscriber, oldest first. A subscriber that
    /// panics is logged and the rest still receive the event.
    pub fn emit(&self, event: &IndexEvent) {
        let snapshot: Vec<(SubscriptionId, EventCallback)> = self
            .subscribers
            .read()
            .unwrap()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();
        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!("Event subscriber {} panicked on {}", id, event.kind());
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().unwrap().len())
            .finish()
    }
}
