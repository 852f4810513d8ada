//! Change-notification fan-out.
//!
//! The dispatcher keeps one subscriber lane per point slot. The value
//! store calls `Dispatcher::deliver` synchronously from inside `write`, while
//! it still holds the slot's delivery lock, so every subscriber of a key sees
//! that key's changes in write order. Lanes are independent: there is no
//! ordering between keys.
//!
//! # Isolation
//!
//! A subscriber that returns an error or panics is logged and skipped; the
//! remaining subscribers still receive the change and the writer still
//! returns normally. Subscribers that need to do slow I/O should use
//! [`ValueStore::subscribe_channel`][crate::ValueStore::subscribe_channel]
//! and drain the receiver on their own task.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use avhub_types::Value;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Callbacks running longer than this are reported.
pub const SLOW_SUBSCRIBER: Duration = Duration::from_millis(5);

/// A notified change of one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    pub previous: Value,
    pub current: Value,
    pub timestamp: DateTime<Utc>,
    /// Name of the writer, usually the plugin instance.
    pub source: String,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Failure reported by a subscriber callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    /// The consumer is gone; the subscription is removed after this delivery.
    #[error("subscriber closed")]
    Closed,
    #[error("subscriber failed: {0}")]
    Failed(String),
}

pub type Callback = Arc<dyn Fn(&Change) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Per-slot subscriber lists.
pub(crate) struct Dispatcher {
    lanes: Vec<RwLock<Vec<Subscriber>>>,
    owners: Mutex<HashMap<SubscriptionId, usize>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            lanes: (0..slots).map(|_| RwLock::new(Vec::new())).collect(),
            owners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe<F>(&self, slot: usize, callback: F) -> SubscriptionId
    where
        F: Fn(&Change) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(callback);
        self.lanes[slot].write().push(Subscriber { id, callback });
        self.owners.lock().insert(id, slot);
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(slot) = self.owners.lock().remove(&id) else {
            return false;
        };
        self.lanes[slot].write().retain(|s| s.id != id);
        true
    }

    pub(crate) fn subscriber_count(&self, slot: usize) -> usize {
        self.lanes.get(slot).map_or(0, |lane| lane.read().len())
    }

    /// Invoke every subscriber of `slot` with `change`.
    ///
    /// Returns the number of subscribers that accepted the change.
    pub(crate) fn deliver(&self, slot: usize, change: &Change) -> usize {
        // Snapshot the lane so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<Subscriber> = self.lanes[slot].read().clone();
        let mut accepted = 0;
        let mut closed = Vec::new();

        for subscriber in &subscribers {
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(change)));
            let elapsed = started.elapsed();
            if elapsed > SLOW_SUBSCRIBER {
                warn!(
                    key = %change.key,
                    subscription = %subscriber.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow subscriber is stalling the writer"
                );
            }
            match outcome {
                Ok(Ok(())) => accepted += 1,
                Ok(Err(SubscriberError::Closed)) => closed.push(subscriber.id),
                Ok(Err(e)) => {
                    warn!(key = %change.key, subscription = %subscriber.id, error = %e, "subscriber failed");
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(key = %change.key, subscription = %subscriber.id, panic = %message, "subscriber panicked");
                }
            }
        }

        for id in closed {
            if self.unsubscribe(id) {
                debug!(key = %change.key, subscription = %id, "removed closed subscriber");
            }
        }
        accepted
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
