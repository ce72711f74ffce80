//! Correlation registry.
//!
//! Every outstanding unary call and active stream is keyed here by its
//! [`CorrelationId`]. Inbound envelopes are matched by identifier alone; the
//! `kind` is never consulted.
//!
//! # Cleanup
//!
//! 1. **On reply**: unary entries are removed when resolved, stream entries
//!    when their completion marker arrives
//! 2. **Explicitly**: [`Registry::cancel`], [`Registry::fail`], and
//!    [`Registry::deregister`]
//! 3. **Lazily**: a stream whose consumer went away is removed the next time
//!    something is fed to it
//! 4. **By capacity**: the oldest entries are evicted once `max_pending` is
//!    reached
//! 5. **On disconnect**: [`Registry::abandon_all`]
//!
//! Removed identifiers are remembered as tombstones for a while so that late
//! envelopes bearing them are recognized as inert rather than unmatched.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use async_lock::Mutex;
use futures::channel::{mpsc, oneshot};
use serde_json::Value;

use crate::{
    envelope::{CorrelationId, Envelope, StreamPayload},
    error::CallError,
};

/// Default bound on outstanding calls and streams.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Default number of recently completed identifiers remembered.
pub const DEFAULT_MAX_TOMBSTONES: usize = 1_024;

/// Resolves a unary call.
pub type UnaryResolver = oneshot::Sender<Result<Value, CallError>>;

/// Waits on a unary call.
pub type UnaryWaiter = oneshot::Receiver<Result<Value, CallError>>;

/// One event delivered to a stream consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A text fragment.
    Fragment(String),

    /// The completion marker with its terminal value.
    Complete(Value),

    /// The stream was torn down locally.
    Failed(CallError),
}

/// Receives the events of one stream.
pub type StreamEvents = mpsc::UnboundedReceiver<StreamEvent>;

#[derive(Debug)]
enum Entry {
    Unary(UnaryResolver),
    Stream(mpsc::UnboundedSender<StreamEvent>),
}

impl Entry {
    fn fail(self, err: CallError) {
        match self {
            Entry::Unary(resolver) => {
                let _ = resolver.send(Err(err));
            }
            Entry::Stream(events) => {
                let _ = events.unbounded_send(StreamEvent::Failed(err));
            }
        }
    }
}

/// What happened to an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// A pending unary call was resolved.
    Resolved,

    /// A fragment was fed to an active stream.
    Fed,

    /// An active stream received its completion marker.
    Completed,

    /// The identifier belongs to something already finished; ignored.
    Inert,

    /// The envelope matched a stream but its payload was malformed; ignored.
    Rejected,

    /// No entry has this identifier. The envelope is handed back.
    Unmatched(Envelope),
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    entry: Entry,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<CorrelationId, Slot>,

    /// Registration sequence to identifier, oldest first.
    order: BTreeMap<u64, CorrelationId>,
    next_seq: u64,

    tombstones: HashSet<CorrelationId>,
    tombstone_order: VecDeque<CorrelationId>,

    max_pending: usize,
    max_tombstones: usize,
}

impl Inner {
    fn new(max_pending: usize, max_tombstones: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            tombstones: HashSet::new(),
            tombstone_order: VecDeque::new(),
            max_pending: max_pending.max(1),
            max_tombstones,
        }
    }

    fn insert(&mut self, id: CorrelationId, entry: Entry) {
        if let Some(previous) = self.entries.remove(&id) {
            tracing::warn!(correlation_id = %id, "identifier registered twice, replacing");
            self.order.remove(&previous.seq);
            previous.entry.fail(CallError::Cancelled);
        }

        while self.entries.len() >= self.max_pending {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                tracing::warn!(
                    correlation_id = %oldest,
                    capacity = self.max_pending,
                    "registry at capacity, evicting oldest entry"
                );
                self.bury(oldest);
                evicted.entry.fail(CallError::Evicted);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, Slot { seq, entry });
        self.order.insert(seq, id);
        self.record_size();
    }

    fn take(&mut self, id: CorrelationId) -> Option<Entry> {
        let Slot { seq, entry } = self.entries.remove(&id)?;
        self.order.remove(&seq);
        self.bury(id);
        self.record_size();
        Some(entry)
    }

    fn bury(&mut self, id: CorrelationId) {
        if self.max_tombstones == 0 || !self.tombstones.insert(id) {
            return;
        }
        self.tombstone_order.push_back(id);
        while self.tombstone_order.len() > self.max_tombstones {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    fn route(&mut self, envelope: Envelope) -> Routed {
        let id = envelope.correlation_id;

        let Some(Slot { entry, .. }) = self.entries.get(&id) else {
            if self.tombstones.contains(&id) {
                tracing::debug!(correlation_id = %id, kind = %envelope.kind, "late envelope ignored");
                #[cfg(feature = "metrics")]
                crate::metrics::inert_envelope();
                return Routed::Inert;
            }
            return Routed::Unmatched(envelope);
        };

        match entry {
            Entry::Unary(_) => {
                if let Some(Entry::Unary(resolver)) = self.take(id) {
                    if resolver.send(Ok(envelope.payload)).is_err() {
                        tracing::debug!(correlation_id = %id, "caller stopped waiting before reply");
                    }
                }
                Routed::Resolved
            }
            Entry::Stream(events) => {
                let (event, done) = match StreamPayload::classify(envelope.payload) {
                    Ok(StreamPayload::Fragment(fragment)) => (StreamEvent::Fragment(fragment), false),
                    Ok(StreamPayload::Complete(value)) => (StreamEvent::Complete(value), true),
                    Err(violation) => {
                        tracing::warn!(correlation_id = %id, %violation, "ignoring malformed stream payload");
                        return Routed::Rejected;
                    }
                };

                if events.unbounded_send(event).is_err() {
                    tracing::debug!(correlation_id = %id, "stream consumer dropped, deregistering");
                    let _ = self.take(id);
                    return Routed::Inert;
                }

                if done {
                    let _ = self.take(id);
                    Routed::Completed
                } else {
                    Routed::Fed
                }
            }
        }
    }

    fn record_size(&self) {
        #[cfg(feature = "metrics")]
        crate::metrics::registry_size(self.entries.len());
    }
}

/// Shared handle to the table of outstanding correlations.
///
/// Clones share the same table.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    /// Create a registry with the given bounds.
    ///
    /// A `max_pending` of zero behaves like one.
    #[must_use]
    pub fn new(max_pending: usize, max_tombstones: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(max_pending, max_tombstones))),
        }
    }

    /// Register a unary call awaiting exactly one reply.
    pub async fn register_unary(&self, id: CorrelationId) -> UnaryWaiter {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, Entry::Unary(tx));
        rx
    }

    /// Register a stream awaiting fragments and a completion marker.
    pub async fn register_stream(&self, id: CorrelationId) -> StreamEvents {
        let (tx, rx) = mpsc::unbounded();
        self.inner.lock().await.insert(id, Entry::Stream(tx));
        rx
    }

    /// Match an inbound envelope against the outstanding entries.
    pub async fn route(&self, envelope: Envelope) -> Routed {
        self.inner.lock().await.route(envelope)
    }

    /// Fail and deregister an entry. Returns whether it was present.
    pub async fn fail(&self, id: CorrelationId, err: CallError) -> bool {
        let entry = self.inner.lock().await.take(id);
        match entry {
            Some(entry) => {
                tracing::debug!(correlation_id = %id, %err, "failing pending entry");
                entry.fail(err);
                true
            }
            None => false,
        }
    }

    /// Cancel and deregister an entry; its waiter sees [`CallError::Cancelled`].
    pub async fn cancel(&self, id: CorrelationId) -> bool {
        self.fail(id, CallError::Cancelled).await
    }

    /// Deregister an entry without notifying its waiter.
    pub async fn deregister(&self, id: CorrelationId) -> bool {
        self.inner.lock().await.take(id).is_some()
    }

    /// Fail every entry with [`CallError::Disconnected`].
    ///
    /// Returns how many entries were abandoned.
    pub async fn abandon_all(&self) -> usize {
        let drained: Vec<(CorrelationId, Entry)> = {
            let mut inner = self.inner.lock().await;
            inner.order.clear();
            let drained: Vec<_> = inner
                .entries
                .drain()
                .map(|(id, slot)| (id, slot.entry))
                .collect();
            for (id, _) in &drained {
                inner.bury(*id);
            }
            inner.record_size();
            drained
        };

        let count = drained.len();
        for (_, entry) in drained {
            entry.fail(CallError::Disconnected);
        }
        if count > 0 {
            tracing::info!(count, "abandoned in-flight correlations");
        }
        count
    }

    /// Deregister an entry without waiting for the lock.
    ///
    /// Returns `false` if the lock is contended or nothing is registered;
    /// the entry is then left for lazy cleanup.
    pub fn try_deregister(&self, id: CorrelationId) -> bool {
        self.inner
            .try_lock()
            .is_some_and(|mut inner| inner.take(id).is_some())
    }

    /// Whether an entry with this identifier is outstanding.
    pub async fn contains(&self, id: CorrelationId) -> bool {
        self.inner.lock().await.entries.contains_key(&id)
    }

    /// Number of outstanding entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether nothing is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, DEFAULT_MAX_TOMBSTONES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn reply(id: CorrelationId, payload: Value) -> Envelope {
        Envelope::with_id(id, "reply", payload)
    }

    /// Index and order must agree.
    fn assert_consistent(inner: &Inner) {
        assert_eq!(inner.entries.len(), inner.order.len());
        for (seq, id) in &inner.order {
            assert_eq!(inner.entries.get(id).map(|slot| slot.seq), Some(*seq));
        }
        assert_eq!(inner.tombstones.len(), inner.tombstone_order.len());
    }

    mod unary {
        use super::*;

        #[tokio::test]
        async fn resolves_once_then_goes_inert() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let waiter = registry.register_unary(id).await;

            assert_eq!(registry.route(reply(id, json!({"msg": "hi"}))).await, Routed::Resolved);
            assert_eq!(registry.route(reply(id, json!({"msg": "again"}))).await, Routed::Inert);

            assert_eq!(waiter.await.expect("resolved"), Ok(json!({"msg": "hi"})));
            assert!(registry.is_empty().await);
        }

        #[tokio::test]
        async fn unknown_identifier_is_handed_back() {
            let registry = Registry::default();
            let env = reply(CorrelationId::generate(), json!(1));
            assert_eq!(registry.route(env.clone()).await, Routed::Unmatched(env));
        }

        #[tokio::test]
        async fn kind_is_ignored_when_matching() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let waiter = registry.register_unary(id).await;

            let env = Envelope::with_id(id, "something/else", json!(3));
            assert_eq!(registry.route(env).await, Routed::Resolved);
            assert_eq!(waiter.await.expect("resolved"), Ok(json!(3)));
        }

        #[tokio::test]
        async fn cancel_fails_the_waiter() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let waiter = registry.register_unary(id).await;

            assert!(registry.cancel(id).await);
            assert!(!registry.cancel(id).await);
            assert_eq!(waiter.await.expect("failed"), Err(CallError::Cancelled));
            assert_eq!(registry.route(reply(id, json!(null))).await, Routed::Inert);
        }

        #[tokio::test]
        async fn deregister_drops_silently() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let waiter = registry.register_unary(id).await;

            assert!(registry.deregister(id).await);
            assert!(waiter.await.is_err());
        }
    }

    mod stream {
        use super::*;

        #[tokio::test]
        async fn fragments_then_completion() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let mut events = registry.register_stream(id).await;

            assert_eq!(registry.route(reply(id, json!("a"))).await, Routed::Fed);
            assert_eq!(registry.route(reply(id, json!("bc"))).await, Routed::Fed);
            assert_eq!(
                registry.route(reply(id, json!({"done": true, "value": "done"}))).await,
                Routed::Completed
            );
            assert_eq!(registry.route(reply(id, json!("late"))).await, Routed::Inert);

            assert_eq!(events.next().await, Some(StreamEvent::Fragment("a".into())));
            assert_eq!(events.next().await, Some(StreamEvent::Fragment("bc".into())));
            assert_eq!(events.next().await, Some(StreamEvent::Complete(json!("done"))));
            assert_eq!(events.next().await, None);
        }

        #[tokio::test]
        async fn malformed_payload_is_rejected_and_stream_survives() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let mut events = registry.register_stream(id).await;

            assert_eq!(registry.route(reply(id, json!(42))).await, Routed::Rejected);
            assert!(registry.contains(id).await);

            assert_eq!(registry.route(reply(id, json!("x"))).await, Routed::Fed);
            assert_eq!(events.next().await, Some(StreamEvent::Fragment("x".into())));
        }

        #[tokio::test]
        async fn try_deregister_backs_off_while_locked() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            let _events = registry.register_stream(id).await;

            {
                let _held = registry.inner.lock().await;
                assert!(!registry.try_deregister(id));
            }
            assert!(registry.contains(id).await);

            assert!(registry.try_deregister(id));
            assert!(!registry.contains(id).await);
            assert_eq!(registry.route(reply(id, json!("x"))).await, Routed::Inert);
        }

        #[tokio::test]
        async fn dropped_consumer_is_cleaned_up_on_next_feed() {
            let registry = Registry::default();
            let id = CorrelationId::generate();
            drop(registry.register_stream(id).await);

            assert!(registry.contains(id).await);
            assert_eq!(registry.route(reply(id, json!("x"))).await, Routed::Inert);
            assert!(!registry.contains(id).await);
        }
    }

    mod capacity {
        use super::*;

        #[tokio::test]
        async fn evicts_oldest_first() {
            let registry = Registry::new(2, 16);
            let first = CorrelationId::generate();
            let second = CorrelationId::generate();
            let third = CorrelationId::generate();

            let first_waiter = registry.register_unary(first).await;
            let _second_waiter = registry.register_unary(second).await;
            let _third_waiter = registry.register_unary(third).await;

            assert_eq!(registry.len().await, 2);
            assert!(!registry.contains(first).await);
            assert!(registry.contains(second).await);
            assert!(registry.contains(third).await);
            assert_eq!(first_waiter.await.expect("failed"), Err(CallError::Evicted));
            assert_consistent(&*registry.inner.lock().await);
        }

        #[tokio::test]
        async fn removal_from_the_middle_keeps_eviction_order() {
            let registry = Registry::new(3, 16);
            let ids: Vec<_> = (0..5).map(|_| CorrelationId::generate()).collect();
            let [a, b, c, d, e] = ids[..] else {
                unreachable!("five identifiers")
            };

            let a_waiter = registry.register_unary(a).await;
            let _b_waiter = registry.register_unary(b).await;
            let _c_waiter = registry.register_unary(c).await;
            assert_eq!(registry.route(reply(b, json!(1))).await, Routed::Resolved);

            let _d_waiter = registry.register_unary(d).await;
            let _e_waiter = registry.register_unary(e).await;

            assert_eq!(a_waiter.await.expect("failed"), Err(CallError::Evicted));
            for id in [c, d, e] {
                assert!(registry.contains(id).await);
            }
            assert_consistent(&*registry.inner.lock().await);
        }

        #[tokio::test]
        async fn evicted_stream_sees_failure() {
            let registry = Registry::new(1, 16);
            let mut events = registry.register_stream(CorrelationId::generate()).await;
            let _waiter = registry.register_unary(CorrelationId::generate()).await;

            assert_eq!(
                events.next().await,
                Some(StreamEvent::Failed(CallError::Evicted))
            );
        }

        #[tokio::test]
        async fn tombstones_are_bounded() {
            let registry = Registry::new(16, 2);
            let ids: Vec<_> = (0..3).map(|_| CorrelationId::generate()).collect();
            for id in &ids {
                let _waiter = registry.register_unary(*id).await;
                registry.deregister(*id).await;
            }

            let inner = registry.inner.lock().await;
            assert_consistent(&inner);
            assert_eq!(inner.tombstones.len(), 2);
            assert!(ids.first().is_some_and(|id| !inner.tombstones.contains(id)));
        }
    }

    mod disconnect {
        use super::*;

        #[tokio::test]
        async fn abandons_everything() {
            let registry = Registry::default();
            let unary_id = CorrelationId::generate();
            let stream_id = CorrelationId::generate();
            let waiter = registry.register_unary(unary_id).await;
            let mut events = registry.register_stream(stream_id).await;

            assert_eq!(registry.abandon_all().await, 2);
            assert!(registry.is_empty().await);

            assert_eq!(waiter.await.expect("failed"), Err(CallError::Disconnected));
            assert_eq!(
                events.next().await,
                Some(StreamEvent::Failed(CallError::Disconnected))
            );
            assert_eq!(registry.route(reply(unary_id, json!(1))).await, Routed::Inert);
            assert_consistent(&*registry.inner.lock().await);
        }
    }
}
