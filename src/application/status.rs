//! Synchronous observer list for coordinator status snapshots.
//!
//! Subscribers run on the publishing thread, in registration order. A
//! panicking subscriber is logged and skipped; the remaining subscribers
//! still receive the snapshot.

use crate::domain::models::BlockingStatus;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type StatusCallback = Arc<dyn Fn(&BlockingStatus) + Send + Sync>;

#[derive(Default)]
struct SubscriberList {
    entries: Vec<(u64, StatusCallback)>,
}

#[derive(Default)]
pub struct StatusPublisher {
    subscribers: Arc<Mutex<SubscriberList>>,
    next_id: AtomicU64,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BlockingStatus) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_subscribers(&self.subscribers)
            .entries
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn publish(&self, status: &BlockingStatus) {
        // Snapshot the list so callbacks may subscribe or unsubscribe while
        // being notified.
        let callbacks: Vec<StatusCallback> = lock_subscribers(&self.subscribers)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                tracing::error!("status change subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock_subscribers(&self.subscribers).entries.len()
    }

    pub fn clear(&self) {
        lock_subscribers(&self.subscribers).entries.clear();
    }
}

fn lock_subscribers(subscribers: &Mutex<SubscriberList>) -> MutexGuard<'_, SubscriberList> {
    subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`StatusPublisher::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<SubscriberList>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock_subscribers(&subscribers)
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}
