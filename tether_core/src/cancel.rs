//! Advisory cancellation of streams.
//!
//! Cancelling a stream asks the host to stop producing fragments by sending
//! one `abort` envelope with the stream's identifier. It does not end the
//! local stream: that still finishes when the host emits its completion
//! marker.

use core::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{
    future::{BoxFuture, LocalBoxFuture},
    FutureExt,
};

use crate::{
    dispatcher::{Delivery, Dispatcher, ScheduleRetry},
    envelope::{CorrelationId, Envelope},
    future::{FutureKind, Local, Sendable},
    spawn::Spawn,
    timer::Timer,
    transport::Transport,
};

/// Ensures at most one `abort` is sent for a stream.
///
/// Clones share the same flag, so a watcher task and the stream handle can
/// both hold one.
#[derive(Debug, Clone)]
pub struct AbortNotice {
    correlation_id: CorrelationId,
    sent: Arc<AtomicBool>,
}

impl AbortNotice {
    /// Create a new [`AbortNotice`] for the stream with this identifier.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The stream's identifier.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Whether the abort has already gone out.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Send the abort unless it was already sent.
    ///
    /// Returns `None` if this call did not send anything.
    pub async fn fire<K, T, Tm, S>(&self, dispatcher: &Dispatcher<K, T, Tm, S>) -> Option<Delivery>
    where
        K: ScheduleRetry<T, Tm, S>,
        T: Transport<K>,
        Tm: Timer<K> + Clone,
        S: Spawn<K> + Clone,
    {
        if self.sent.swap(true, Ordering::AcqRel) {
            return None;
        }

        tracing::info!(correlation_id = %self.correlation_id, "asking host to abort stream");
        Some(dispatcher.send_detached(Envelope::abort(self.correlation_id)).await)
    }
}

/// A future that signals cancellation when it completes.
///
/// Any `Future<Output = ()>` works; this trait only boxes it for the session's
/// [`FutureKind`].
pub trait CancelSignal<K: FutureKind> {
    /// Box the signal.
    fn into_signal(self) -> K::Future<'static, ()>;
}

impl<F: Future<Output = ()> + Send + 'static> CancelSignal<Sendable> for F {
    fn into_signal(self) -> BoxFuture<'static, ()> {
        self.boxed()
    }
}

impl<F: Future<Output = ()> + 'static> CancelSignal<Local> for F {
    fn into_signal(self) -> LocalBoxFuture<'static, ()> {
        self.boxed_local()
    }
}

async fn watch<K, T, Tm, S>(
    dispatcher: Dispatcher<K, T, Tm, S>,
    notice: AbortNotice,
    signal: K::Future<'static, ()>,
) where
    K: ScheduleRetry<T, Tm, S>,
    T: Transport<K>,
    Tm: Timer<K> + Clone,
    S: Spawn<K> + Clone,
{
    signal.await;

    let id = notice.correlation_id();
    if !dispatcher.registry().contains(id).await {
        tracing::debug!(correlation_id = %id, "cancelled after stream finished, nothing to abort");
        return;
    }

    let _ = notice.fire(&dispatcher).await;
}

/// Boxes the cancellation watcher task for a [`FutureKind`].
pub trait WatchCancel<T, Tm, S>: ScheduleRetry<T, Tm, S> {
    /// Build the task that waits on `signal` and then fires `notice`.
    fn watch_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        notice: AbortNotice,
        signal: Self::Future<'static, ()>,
    ) -> Self::Future<'static, ()>;
}

impl<T, Tm, S> WatchCancel<T, Tm, S> for Sendable
where
    T: Transport<Sendable> + Send + Sync + 'static,
    Tm: Timer<Sendable> + Clone + Send + Sync + 'static,
    S: Spawn<Sendable> + Clone + Send + Sync + 'static,
{
    fn watch_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        notice: AbortNotice,
        signal: BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, ()> {
        watch(dispatcher, notice, signal).boxed()
    }
}

impl<T, Tm, S> WatchCancel<T, Tm, S> for Local
where
    T: Transport<Local> + 'static,
    Tm: Timer<Local> + Clone + 'static,
    S: Spawn<Local> + Clone + 'static,
{
    fn watch_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        notice: AbortNotice,
        signal: LocalBoxFuture<'static, ()>,
    ) -> LocalBoxFuture<'static, ()> {
        watch(dispatcher, notice, signal).boxed_local()
    }
}
