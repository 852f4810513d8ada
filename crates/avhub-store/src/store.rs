//! [`ValueStore`] – the mutable per-point value table.
//!
//! The store is the single shared mutable resource of the hub. Each point
//! slot owns two locks:
//!
//! * `state` – guards the current value, previous value, quality and
//!   timestamp. Readers only ever take this one, briefly.
//! * `delivery` – held while a value is stored and its change is
//!   dispatched synchronously. Same-key writes are therefore
//!   strictly serialized together with their notifications, while writes to
//!   different keys never touch the same lock.
//!
//! A thread never holds more than one delivery lock of a store. A write
//! issued from inside a subscriber callback is validated immediately but
//! applied only after the delivery that triggered it has finished and
//! released its lock; its [`WriteReport`] is marked `deferred`. Such a
//! cascade follows a chain of keys: a callback write that targets a key
//! already on its own chain would loop forever and is rejected with
//! [`HubError::ReentrantWrite`]. Reads are never deferred, so a subscriber
//! may read any key at any time.
//!
//! # Write policy
//!
//! | Case | Outcome |
//! |---|---|
//! | undefined key | [`HubError::NotFound`], nothing stored |
//! | value not coercible to the declared type | [`HubError::TypeMismatch`], nothing stored |
//! | non-finite float | [`HubError::InvalidValue`], nothing stored |
//! | numeric value outside `[min, max]` | clamped to the nearest bound, [`WriteStatus::Clamped`] |
//! | otherwise | stored as given, [`WriteStatus::Stored`] |
//!
//! Storage is unconditional for every valid write. Tolerance only decides
//! whether subscribers are notified: numeric points notify when
//! `|new - previous| >= tolerance` and the value changed; boolean and string
//! points notify on any change and always on their first write.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use avhub_points::{PointDefinition, PointRegistry};
use avhub_types::{HubError, PointType, Quality, Value};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::dispatch::{Change, Dispatcher, SubscriberError, SubscriptionId};

/// Snapshot of one point, owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: Value,
    pub previous: Value,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

/// How a valid write was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Stored,
    /// The value was outside the declared bounds and was clamped.
    Clamped,
}

/// Result of a successful [`ValueStore::write`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub status: WriteStatus,
    /// The value actually stored (after coercion and clamping).
    pub value: Value,
    /// Whether subscribers were notified. Always `false` for a deferred
    /// write; its notification happens when it is applied.
    pub notified: bool,
    /// Issued from a subscriber callback and queued behind the running
    /// delivery.
    pub deferred: bool,
}

impl WriteReport {
    pub fn is_clamped(&self) -> bool {
        self.status == WriteStatus::Clamped
    }
}

struct SlotState {
    value: Value,
    previous: Value,
    quality: Quality,
    timestamp: DateTime<Utc>,
    written: bool,
}

struct Slot {
    state: Mutex<SlotState>,
    delivery: Mutex<()>,
}

/// Typed, policy-enforcing value table shared by every adapter.
pub struct ValueStore {
    registry: Arc<PointRegistry>,
    slots: Vec<Slot>,
    dispatcher: Dispatcher,
}

impl ValueStore {
    /// Create one slot per definition, seeded with its declared initial.
    pub fn new(registry: Arc<PointRegistry>) -> Self {
        let now = Utc::now();
        let slots = registry
            .iter()
            .map(|def| {
                let seed = def.seed_value();
                Slot {
                    state: Mutex::new(SlotState {
                        previous: seed.clone(),
                        value: seed,
                        quality: Quality::Initial,
                        timestamp: now,
                        written: false,
                    }),
                    delivery: Mutex::new(()),
                }
            })
            .collect();
        let dispatcher = Dispatcher::new(registry.len());
        debug!(points = registry.len(), "value store seeded");
        Self {
            registry,
            slots,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &PointRegistry {
        &self.registry
    }

    /// Current value, previous value, quality and timestamp of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for undefined keys.
    pub fn read(&self, key: &str) -> Result<Reading, HubError> {
        let slot = self.registry.index_of(key)?;
        let state = self.slots[slot].state.lock();
        Ok(Reading {
            value: state.value.clone(),
            previous: state.previous.clone(),
            quality: state.quality,
            timestamp: state.timestamp,
        })
    }

    /// Readings of every point, in definition order.
    pub fn snapshot(&self) -> Vec<(String, Reading)> {
        self.registry
            .iter()
            .zip(&self.slots)
            .map(|(def, slot)| {
                let state = slot.state.lock();
                (
                    def.key.clone(),
                    Reading {
                        value: state.value.clone(),
                        previous: state.previous.clone(),
                        quality: state.quality,
                        timestamp: state.timestamp,
                    },
                )
            })
            .collect()
    }

    /// Store `value` for `key` on behalf of `source` and notify subscribers.
    ///
    /// Returns once the change and every write cascaded from its subscribers
    /// have been applied.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`], [`HubError::TypeMismatch`],
    /// [`HubError::InvalidValue`] or, from inside a callback,
    /// [`HubError::ReentrantWrite`]; the store is unchanged in every error case.
    pub fn write(&self, key: &str, value: impl Into<Value>, source: &str) -> Result<WriteReport, HubError> {
        let (slot, def) = self.registry.lookup(key)?;
        let (value, clamped) = admit(def, value.into())?;
        let status = if clamped { WriteStatus::Clamped } else { WriteStatus::Stored };

        let queued = with_cascade(self.id(), |cascade| {
            if cascade.chain.is_empty() {
                return None;
            }
            if cascade.chain.contains(&slot) {
                return Some(Err(HubError::ReentrantWrite(def.key.clone())));
            }
            cascade.pending.push_back(Pending {
                slot,
                value: value.clone(),
                clamped,
                source: source.to_string(),
                chain: cascade.chain.clone(),
            });
            Some(Ok(()))
        });
        if let Some(queued) = queued.flatten() {
            queued?;
            trace!(key, source, "write deferred behind running delivery");
            return Ok(WriteReport {
                status,
                value,
                notified: false,
                deferred: true,
            });
        }

        let _cascade = CascadeGuard::enter(self.id());
        let notified = self.commit(slot, value.clone(), clamped, source, Vec::new());
        while let Some(next) = with_cascade(self.id(), |c| c.pending.pop_front()).flatten() {
            self.commit(next.slot, next.value, next.clamped, &next.source, next.chain);
        }

        Ok(WriteReport {
            status,
            value,
            notified,
            deferred: false,
        })
    }

    /// Apply an admitted value and deliver its change. `chain` holds the
    /// slots whose deliveries led to this write.
    fn commit(&self, slot_index: usize, value: Value, clamped: bool, source: &str, mut chain: Vec<usize>) -> bool {
        let Some(def) = self.registry.get(slot_index) else {
            return false;
        };
        let slot = &self.slots[slot_index];

        let _delivery = slot.delivery.lock();
        let change = {
            let mut state = slot.state.lock();
            let notify = should_notify(def, &state.value, &value, state.written);
            let previous = std::mem::replace(&mut state.value, value.clone());
            state.previous = previous.clone();
            state.quality = if clamped { Quality::Clamped } else { Quality::Good };
            state.timestamp = Utc::now();
            state.written = true;
            notify.then(|| Change {
                key: def.key.clone(),
                previous,
                current: value.clone(),
                timestamp: state.timestamp,
                source: source.to_string(),
            })
        };
        if clamped {
            debug!(key = %def.key, source, value = %value, "write clamped to bounds");
        }

        let Some(change) = change else {
            return false;
        };
        chain.push(slot_index);
        with_cascade(self.id(), |c| c.chain = chain);
        let accepted = self.dispatcher.deliver(slot_index, &change);
        with_cascade(self.id(), |c| c.chain.clear());
        trace!(key = %def.key, source, accepted, "change dispatched");
        true
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Mark `key` as invalid without touching its value or notifying.
    pub fn invalidate(&self, key: &str) -> Result<(), HubError> {
        let slot = self.registry.index_of(key)?;
        let mut state = self.slots[slot].state.lock();
        state.quality = Quality::Invalid;
        state.timestamp = Utc::now();
        Ok(())
    }

    /// Register `callback` for changes of `key`.
    ///
    /// The callback runs synchronously inside the writer's call; hand slow
    /// work off to another task (see [`subscribe_channel`][Self::subscribe_channel]).
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Result<SubscriptionId, HubError>
    where
        F: Fn(&Change) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let slot = self.registry.index_of(key)?;
        Ok(self.dispatcher.subscribe(slot, callback))
    }

    /// Subscribe through an unbounded channel.
    ///
    /// The subscription is removed automatically on the first change after
    /// the receiver is dropped.
    pub fn subscribe_channel(
        &self,
        key: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Change>), HubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(key, move |change| {
            tx.send(change.clone()).map_err(|_| SubscriberError::Closed)
        })?;
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn subscriber_count(&self, key: &str) -> Result<usize, HubError> {
        Ok(self.dispatcher.subscriber_count(self.registry.index_of(key)?))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cascaded writes
// ────────────────────────────────────────────────────────────────────────────

/// A callback write waiting for the running delivery to finish.
struct Pending {
    slot: usize,
    value: Value,
    clamped: bool,
    source: String,
    chain: Vec<usize>,
}

/// Per-thread bookkeeping of one outermost `write` on one store.
struct Cascade {
    store: usize,
    /// Slots of the delivery currently running, oldest first; empty between
    /// deliveries.
    chain: Vec<usize>,
    pending: VecDeque<Pending>,
}

thread_local! {
    static CASCADES: RefCell<Vec<Cascade>> = const { RefCell::new(Vec::new()) };
}

fn with_cascade<R>(store: usize, f: impl FnOnce(&mut Cascade) -> R) -> Option<R> {
    CASCADES.with_borrow_mut(|cascades| cascades.iter_mut().rev().find(|c| c.store == store).map(f))
}

/// Keeps a [`Cascade`] registered for the duration of an outermost write.
struct CascadeGuard;

impl CascadeGuard {
    fn enter(store: usize) -> Self {
        CASCADES.with_borrow_mut(|cascades| {
            cascades.push(Cascade {
                store,
                chain: Vec::new(),
                pending: VecDeque::new(),
            })
        });
        CascadeGuard
    }
}

impl Drop for CascadeGuard {
    fn drop(&mut self) {
        CASCADES.with_borrow_mut(|cascades| cascades.pop());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Write policy
// ────────────────────────────────────────────────────────────────────────────

/// Integral floats inside this range convert to `i64` exactly.
const I64_RANGE: Range<f64> = -9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0;

/// Coerce and clamp. Returns the value to store and whether it was clamped.
fn admit(def: &PointDefinition, value: Value) -> Result<(Value, bool), HubError> {
    // An integral float beyond i64 still clamps when the point has a bound on
    // that side.
    if let (PointType::Integer, Value::Float(v)) = (def.point_type, &value)
        && v.is_finite()
        && v.fract() == 0.0
        && !I64_RANGE.contains(v)
    {
        let bound = if *v > 0.0 { &def.max } else { &def.min };
        if let Some(bound) = bound.as_ref().and_then(Value::as_i64) {
            return Ok((Value::Integer(bound), true));
        }
    }
    Ok(clamp(def, coerce(def, value)?))
}

fn coerce(def: &PointDefinition, value: Value) -> Result<Value, HubError> {
    let found = value.point_type();
    match (def.point_type, value) {
        (PointType::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
        (PointType::Integer, Value::Float(v))
            if v.fract() == 0.0 && I64_RANGE.contains(&v) =>
        {
            Ok(Value::Integer(v as i64))
        }
        (PointType::Float, Value::Integer(v)) => Ok(Value::Float(v as f64)),
        (PointType::Float, Value::Float(v)) if v.is_finite() => Ok(Value::Float(v)),
        (PointType::Float, Value::Float(v)) => Err(HubError::InvalidValue {
            key: def.key.clone(),
            details: format!("{v} is not a finite number"),
        }),
        (PointType::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(v)),
        (PointType::Boolean, Value::Integer(v @ (0 | 1))) => Ok(Value::Boolean(v == 1)),
        (PointType::String, Value::Text(v)) => Ok(Value::Text(v)),
        (expected, _) => Err(HubError::TypeMismatch {
            key: def.key.clone(),
            expected,
            found,
        }),
    }
}

fn clamp(def: &PointDefinition, value: Value) -> (Value, bool) {
    match value {
        Value::Integer(v) => {
            let lo = def.min.as_ref().and_then(Value::as_i64);
            let hi = def.max.as_ref().and_then(Value::as_i64);
            match (lo, hi) {
                (Some(lo), _) if v < lo => (Value::Integer(lo), true),
                (_, Some(hi)) if v > hi => (Value::Integer(hi), true),
                _ => (Value::Integer(v), false),
            }
        }
        Value::Float(v) => {
            let lo = def.min.as_ref().and_then(Value::as_f64);
            let hi = def.max.as_ref().and_then(Value::as_f64);
            match (lo, hi) {
                (Some(lo), _) if v < lo => (Value::Float(lo), true),
                (_, Some(hi)) if v > hi => (Value::Float(hi), true),
                _ => (Value::Float(v), false),
            }
        }
        other => (other, false),
    }
}

fn should_notify(def: &PointDefinition, previous: &Value, next: &Value, written: bool) -> bool {
    let tolerance = def.tolerance.unwrap_or(0.0);
    if let (Value::Integer(p), Value::Integer(n)) = (previous, next) {
        let delta = p.abs_diff(*n);
        return delta > 0 && delta as f64 >= tolerance;
    }
    match (previous.as_f64(), next.as_f64()) {
        (Some(p), Some(n)) if def.point_type.is_numeric() => {
            let delta = (n - p).abs();
            delta > 0.0 && delta >= tolerance
        }
        _ => !written || previous != next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    const SOURCE: &str = "\
---
RPM:Engine speed:int:0:100:rpm:100:5:
PCT:Throttle:float:0:100:%:0::
GEAR:Gear down:bool::::false::
COM1:Radio:string::::NAV1::
FLAG:Flag:int::::::
";

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(PointRegistry::from_source(SOURCE).unwrap()))
    }

    fn record(store: &ValueStore, key: &str) -> Arc<Mutex<Vec<Change>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .subscribe(key, move |c| {
                sink.lock().push(c.clone());
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn seeded_from_declared_initial() {
        let store = store();
        let reading = store.read("RPM").unwrap();
        assert_eq!(reading.value, Value::Integer(100));
        assert_eq!(reading.quality, Quality::Initial);
        assert_eq!(store.read("COM1").unwrap().value, Value::Text("NAV1".into()));
        // No declared initial: type zero.
        assert_eq!(store.read("FLAG").unwrap().value, Value::Integer(0));
    }

    #[test]
    fn read_and_write_undefined_key_is_not_found() {
        let store = store();
        assert!(matches!(store.read("VSI"), Err(HubError::NotFound(_))));
        assert!(matches!(store.write("VSI", 1.0, "t"), Err(HubError::NotFound(_))));
    }

    #[test]
    fn tolerance_suppresses_notification_but_not_storage() {
        let store = store();
        let seen = record(&store, "RPM");

        // Above max: clamped back to 100, no change, no notification.
        let report = store.write("RPM", 102, "t").unwrap();
        assert!(report.is_clamped());
        assert!(!report.notified);
        assert!(seen.lock().is_empty());

        let report = store.write("RPM", 98, "t").unwrap();
        assert!(!report.notified);
        assert_eq!(store.read("RPM").unwrap().previous, Value::Integer(100));

        let report = store.write("RPM", 92, "t").unwrap();
        assert!(report.notified);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].previous, Value::Integer(98));
        assert_eq!(seen[0].current, Value::Integer(92));
    }

    #[test]
    fn tolerance_scenario_from_one_hundred() {
        let registry = PointRegistry::from_source("---\nN1:Fan:int::::100:5:\n").unwrap();
        let store = ValueStore::new(Arc::new(registry));
        let seen = record(&store, "N1");

        assert!(!store.write("N1", 102, "t").unwrap().notified);
        assert_eq!(store.read("N1").unwrap().value, Value::Integer(102));

        assert!(store.write("N1", 108, "t").unwrap().notified);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].previous, Value::Integer(102));
        assert_eq!(seen[0].current, Value::Integer(108));
    }

    #[test]
    fn delta_equal_to_tolerance_notifies() {
        let registry = PointRegistry::from_source("---\nN1:Fan:int::::100:5:\n").unwrap();
        let store = ValueStore::new(Arc::new(registry));
        assert!(store.write("N1", 105, "t").unwrap().notified);
    }

    #[test]
    fn out_of_range_values_are_clamped_and_flagged() {
        let store = store();
        let report = store.write("PCT", 150.0, "t").unwrap();
        assert_eq!(report.status, WriteStatus::Clamped);
        assert_eq!(store.read("PCT").unwrap().value, Value::Float(100.0));
        assert_eq!(store.read("PCT").unwrap().quality, Quality::Clamped);

        let report = store.write("PCT", -10.0, "t").unwrap();
        assert!(report.is_clamped());
        assert_eq!(report.value, Value::Float(0.0));
        assert_eq!(store.read("PCT").unwrap().value, Value::Float(0.0));

        let report = store.write("PCT", 42.5, "t").unwrap();
        assert_eq!(report.status, WriteStatus::Stored);
        assert_eq!(store.read("PCT").unwrap().quality, Quality::Good);
    }

    #[test]
    fn type_mismatch_leaves_store_unchanged() {
        let store = store();
        let before = store.read("GEAR").unwrap();
        let err = store.write("GEAR", "down", "t").unwrap_err();
        assert!(matches!(
            err,
            HubError::TypeMismatch {
                expected: PointType::Boolean,
                found: PointType::String,
                ..
            }
        ));
        assert_eq!(store.read("GEAR").unwrap(), before);

        assert!(store.write("RPM", 12.5, "t").is_err());
        assert!(store.write("COM1", 3, "t").is_err());
        assert!(matches!(
            store.write("PCT", f64::NAN, "t"),
            Err(HubError::InvalidValue { .. })
        ));
    }

    #[test]
    fn compatible_values_are_coerced() {
        let store = store();
        assert_eq!(store.write("PCT", 20, "t").unwrap().value, Value::Float(20.0));
        assert_eq!(store.write("RPM", 40.0, "t").unwrap().value, Value::Integer(40));
        assert_eq!(store.write("GEAR", 1, "t").unwrap().value, Value::Boolean(true));
    }

    #[test]
    fn non_numeric_first_write_always_notifies() {
        let store = store();
        let seen = record(&store, "GEAR");
        assert!(store.write("GEAR", false, "t").unwrap().notified);
        assert!(!store.write("GEAR", false, "t").unwrap().notified);
        assert!(store.write("GEAR", true, "t").unwrap().notified);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn change_carries_source_and_previous() {
        let store = store();
        let seen = record(&store, "COM1");
        store.write("COM1", "ILS", "radio-panel").unwrap();
        let seen = seen.lock();
        assert_eq!(seen[0].source, "radio-panel");
        assert_eq!(seen[0].previous, Value::Text("NAV1".into()));
        assert_eq!(store.read("COM1").unwrap().previous, Value::Text("NAV1".into()));
    }

    #[test]
    fn failing_subscriber_does_not_fail_the_write() {
        let store = store();
        store
            .subscribe("PCT", |_| Err(SubscriberError::Failed("offline".into())))
            .unwrap();
        let seen = record(&store, "PCT");
        let report = store.write("PCT", 10.0, "t").unwrap();
        assert!(report.notified);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn subscriber_may_read_the_key_it_observes() {
        let store = Arc::new(store());
        let observed = Arc::new(Mutex::new(None));
        let (inner, out) = (Arc::downgrade(&store), Arc::clone(&observed));
        store
            .subscribe("PCT", move |_| {
                if let Some(store) = inner.upgrade() {
                    *out.lock() = store.read("PCT").ok().map(|r| r.value);
                }
                Ok(())
            })
            .unwrap();
        store.write("PCT", 33.0, "t").unwrap();
        assert_eq!(*observed.lock(), Some(Value::Float(33.0)));
    }

    fn linked_pair() -> Arc<ValueStore> {
        let registry = PointRegistry::from_source("---\nA:Left:int::::0::\nB:Right:int::::0::\n").unwrap();
        Arc::new(ValueStore::new(Arc::new(registry)))
    }

    /// Subscribe `from` so that every change writes `current + step` to `to`,
    /// recording what that inner write returned.
    fn forward(
        store: &Arc<ValueStore>,
        from: &str,
        to: &'static str,
        step: i64,
    ) -> Arc<Mutex<Vec<Result<WriteReport, String>>>> {
        let results = Arc::new(Mutex::new(Vec::new()));
        let (inner, out) = (Arc::downgrade(store), Arc::clone(&results));
        store
            .subscribe(from, move |change| {
                let Some(store) = inner.upgrade() else {
                    return Err(SubscriberError::Closed);
                };
                let next = change.current.as_i64().unwrap_or_default() + step;
                let result = store.write(to, next, "forward");
                out.lock().push(result.as_ref().map(Clone::clone).map_err(ToString::to_string));
                result.map(|_| ()).map_err(|e| SubscriberError::Failed(e.to_string()))
            })
            .unwrap();
        results
    }

    #[test]
    fn subscriber_write_to_another_key_lands_after_delivery() {
        let store = linked_pair();
        let inner = forward(&store, "A", "B", 10);
        let seen_b = record(&store, "B");

        let report = store.write("A", 3, "panel").unwrap();
        assert!(report.notified);
        assert!(!report.deferred);

        let inner = inner.lock();
        let queued = inner[0].as_ref().unwrap();
        assert!(queued.deferred);
        assert!(!queued.notified);
        assert_eq!(queued.value, Value::Integer(13));

        // Applied before the outer write returned.
        assert_eq!(store.read("B").unwrap().value, Value::Integer(13));
        let seen_b = seen_b.lock();
        assert_eq!(seen_b.len(), 1);
        assert_eq!(seen_b[0].source, "forward");
    }

    #[test]
    fn cyclic_subscriber_writes_stop_at_the_first_repeated_key() {
        let store = linked_pair();
        forward(&store, "A", "B", 1);
        let back = forward(&store, "B", "A", 1);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = Arc::clone(&store);
        thread::spawn(move || {
            let _ = done_tx.send(writer.write("A", 1, "panel").map(|r| r.notified));
        });
        let outcome = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("write(A) never returned");
        assert!(outcome.unwrap());

        assert_eq!(store.read("A").unwrap().value, Value::Integer(1));
        assert_eq!(store.read("B").unwrap().value, Value::Integer(2));
        let back = back.lock();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].as_ref().unwrap_err(), "write to 'A' from its own change cascade");
    }

    #[test]
    fn opposing_cascades_on_two_threads_do_not_deadlock() {
        let store = linked_pair();
        forward(&store, "A", "B", 1);
        forward(&store, "B", "A", 1);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for (key, base) in [("A", 0_i64), ("B", 10_000)] {
            let (store, done) = (Arc::clone(&store), done_tx.clone());
            thread::spawn(move || {
                for i in 0..200 {
                    store.write(key, base + i * 10, "writer").unwrap();
                }
                let _ = done.send(key);
            });
        }
        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("writer deadlocked");
        }
    }

    #[test]
    fn integer_delta_is_exact_beyond_f64_precision() {
        let store = store();
        assert!(store.write("FLAG", i64::MAX - 1, "t").unwrap().notified);
        assert!(store.write("FLAG", i64::MAX, "t").unwrap().notified);
        assert!(store.write("FLAG", i64::MIN, "t").unwrap().notified);
        assert!(!store.write("FLAG", i64::MIN, "t").unwrap().notified);
    }

    #[test]
    fn huge_integral_floats_clamp_to_integer_bounds() {
        let store = store();
        let report = store.write("RPM", 1e19, "t").unwrap();
        assert!(report.is_clamped());
        assert_eq!(report.value, Value::Integer(100));

        let report = store.write("RPM", -1e19, "t").unwrap();
        assert!(report.is_clamped());
        assert_eq!(report.value, Value::Integer(0));

        // Without a bound there is nothing to clamp to.
        assert!(matches!(
            store.write("FLAG", 1e19, "t"),
            Err(HubError::TypeMismatch { .. })
        ));
        assert_eq!(
            store.write("FLAG", -9_223_372_036_854_775_808.0, "t").unwrap().value,
            Value::Integer(i64::MIN)
        );
    }

    #[test]
    fn invalidate_flags_quality_only() {
        let store = store();
        let seen = record(&store, "PCT");
        store.write("PCT", 12.0, "t").unwrap();
        store.invalidate("PCT").unwrap();
        let reading = store.read("PCT").unwrap();
        assert_eq!(reading.quality, Quality::Invalid);
        assert_eq!(reading.value, Value::Float(12.0));
        assert_eq!(seen.lock().len(), 1);
        assert!(store.invalidate("NOPE").is_err());
    }

    #[test]
    fn snapshot_follows_definition_order() {
        let store = store();
        let keys: Vec<String> = store.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["RPM", "PCT", "GEAR", "COM1", "FLAG"]);
    }

    #[test]
    fn concurrent_writers_on_distinct_keys_do_not_interfere() {
        const WRITERS: usize = 16;
        let source: String = std::iter::once("---\n".to_string())
            .chain((0..WRITERS).map(|i| format!("P{i}:Point {i}:int::::0::\n")))
            .collect();
        let store = Arc::new(ValueStore::new(Arc::new(
            PointRegistry::from_source(&source).unwrap(),
        )));

        thread::scope(|scope| {
            for i in 0..WRITERS {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for round in 0..200 {
                        store
                            .write(&format!("P{i}"), (i * 1000 + round) as i64, "writer")
                            .unwrap();
                    }
                });
            }
        });

        for i in 0..WRITERS {
            let value = store.read(&format!("P{i}")).unwrap().value;
            assert_eq!(value, Value::Integer((i * 1000 + 199) as i64));
        }
    }

    #[test]
    fn same_key_notifications_arrive_in_write_order() {
        let store = Arc::new(store());
        let seen = record(&store, "PCT");

        thread::scope(|scope| {
            for t in 0..4_i32 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..50_i32 {
                        store.write("PCT", f64::from(t * 10) + f64::from(i) / 100.0, "w").unwrap();
                    }
                });
            }
        });

        // Every notification's previous value is the prior notification's
        // current value: nothing interleaved.
        let seen = seen.lock();
        for pair in seen.windows(2) {
            assert_eq!(pair[1].previous, pair[0].current);
        }
        assert_eq!(
            seen.last().map(|c| c.current.clone()),
            Some(store.read("PCT").unwrap().value)
        );
    }

    #[tokio::test]
    async fn channel_subscription_hands_off_changes() {
        let store = store();
        let (id, mut rx) = store.subscribe_channel("PCT").unwrap();
        store.write("PCT", 5.0, "t").unwrap();
        store.write("PCT", 6.0, "t").unwrap();
        assert_eq!(rx.recv().await.unwrap().current, Value::Float(5.0));
        assert_eq!(rx.recv().await.unwrap().current, Value::Float(6.0));

        drop(rx);
        store.write("PCT", 7.0, "t").unwrap();
        assert_eq!(store.subscriber_count("PCT").unwrap(), 0);
        assert!(!store.unsubscribe(id));
    }
}
