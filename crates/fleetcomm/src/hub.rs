// ABOUTME: Status fan-out from agent links to registered subscribers.
// ABOUTME: Subscriptions are handles that unsubscribe on drop; a panicking subscriber is isolated.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::error;

use crate::types::StatusEvent;

type Callback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Callback)>>,
}

/// Shared publisher for status events.
///
/// Every link publishes from its own pump task, so events of one agent arrive
/// in order while different agents interleave freely.
#[derive(Clone, Default)]
pub struct StatusHub {
    inner: Arc<HubInner>,
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every status event from every agent.
    pub fn subscribe<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .expect("lock poisoned")
            .push((id, Arc::new(callback)));
        StatusSubscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe through an unbounded channel instead of a callback.
    pub fn subscribe_channel(&self) -> (StatusSubscription, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Deliver an event to every current subscriber. Returns how many took it without panicking.
    pub fn publish(&self, event: &StatusEvent) -> usize {
        let snapshot: Vec<(u64, Callback)> = self
            .inner
            .subscribers
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    agent_id = %event.agent_id,
                    subscription = id,
                    "status subscriber panicked"
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().expect("lock poisoned").len()
    }
}

impl std::fmt::Debug for StatusHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Live registration with a [`StatusHub`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StatusSubscription {
    id: u64,
    hub: Weak<HubInner>,
}

impl StatusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.hub.upgrade().is_some_and(|hub| {
            hub.subscribers
                .read()
                .expect("lock poisoned")
                .iter()
                .any(|(id, _)| *id == self.id)
        })
    }

    /// Remove the callback now.
    pub fn unsubscribe(self) {}
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            // The callback may own subscriptions itself; drop it outside the lock.
            let removed = {
                let mut subscribers = hub.subscribers.write().expect("lock poisoned");
                subscribers
                    .iter()
                    .position(|(id, _)| *id == self.id)
                    .map(|index| subscribers.remove(index))
            };
            drop(removed);
        }
    }
}
