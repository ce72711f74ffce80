//! Test doubles for exercising sessions without a real host.

use core::time::Duration;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use futures::{
    future::{self, BoxFuture, LocalBoxFuture},
    FutureExt,
};
use serde_json::Value;

#[cfg(feature = "tokio")]
pub use crate::{spawn::TokioSpawn, timer::TokioTimer};
use crate::{
    envelope::{CorrelationId, Envelope, StreamPayload},
    error::TransportUnavailable,
    future::{Local, Sendable},
    timer::Timer,
    transport::{ChannelTransport, Transport},
};

#[derive(Debug)]
struct FlakyState {
    failures: usize,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<Envelope>>,
    notify_tx: async_channel::Sender<Envelope>,
    notify_rx: async_channel::Receiver<Envelope>,
}

/// A transport that refuses its first `failures` sends, then accepts
/// everything.
///
/// Clones share their counters.
#[derive(Debug, Clone)]
pub struct FlakyTransport {
    state: Arc<FlakyState>,
}

impl FlakyTransport {
    /// Create a new [`FlakyTransport`].
    #[must_use]
    pub fn new(failures: usize) -> Self {
        let (notify_tx, notify_rx) = async_channel::unbounded();
        Self {
            state: Arc::new(FlakyState {
                failures,
                attempts: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
                notify_tx,
                notify_rx,
            }),
        }
    }

    /// Number of sends attempted so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::Acquire)
    }

    /// Every envelope accepted so far, in order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Envelope> {
        self.state
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until the next envelope not yet waited for is accepted.
    pub async fn wait_for_delivery(&self) -> Option<Envelope> {
        self.state.notify_rx.recv().await.ok()
    }

    fn accept(&self, envelope: &Envelope) -> Result<(), TransportUnavailable> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::AcqRel);
        if attempt < self.state.failures {
            return Err(TransportUnavailable::new(
                "flaky",
                format!("refusing attempt {attempt}"),
            ));
        }

        self.state
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        let _ = self.state.notify_tx.try_send(envelope.clone());
        Ok(())
    }
}

impl Transport<Sendable> for FlakyTransport {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn send(&self, envelope: &Envelope) -> BoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.accept(envelope)).boxed()
    }
}

impl Transport<Local> for FlakyTransport {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.accept(envelope)).boxed_local()
    }
}

/// A timer that records every requested delay and completes immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingTimer {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingTimer {
    /// Every delay requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, dur: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dur);
    }
}

impl Timer<Sendable> for RecordingTimer {
    fn sleep(&self, dur: Duration) -> BoxFuture<'static, ()> {
        self.record(dur);
        future::ready(()).boxed()
    }
}

impl Timer<Local> for RecordingTimer {
    fn sleep(&self, dur: Duration) -> LocalBoxFuture<'static, ()> {
        self.record(dur);
        future::ready(()).boxed_local()
    }
}

/// The host end of an in-process channel pair.
///
/// Reads what the UI sends and writes what the UI receives.
#[derive(Debug, Clone)]
pub struct HostHarness {
    from_ui: async_channel::Receiver<Envelope>,
    to_ui: async_channel::Sender<Envelope>,
}

impl HostHarness {
    /// Create a harness.
    ///
    /// Returns the harness, the transport the UI sends through, and the
    /// receiver the UI listens on.
    #[must_use]
    pub fn new() -> (Self, ChannelTransport, async_channel::Receiver<Envelope>) {
        let (transport, from_ui) = ChannelTransport::unbounded();
        let (to_ui, ui_inbound) = async_channel::unbounded();
        (Self { from_ui, to_ui }, transport, ui_inbound)
    }

    /// The next envelope the UI sent, or `None` once the UI side is gone.
    pub async fn next_from_ui(&self) -> Option<Envelope> {
        self.from_ui.recv().await.ok()
    }

    /// An envelope the UI already sent, without waiting.
    #[must_use]
    pub fn try_next_from_ui(&self) -> Option<Envelope> {
        self.from_ui.try_recv().ok()
    }

    /// Deliver an envelope to the UI.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI stopped listening.
    pub async fn send(&self, envelope: Envelope) -> Result<(), async_channel::SendError<Envelope>> {
        self.to_ui.send(envelope).await
    }

    /// Reply to a UI request, reusing its identifier and kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI stopped listening.
    pub async fn reply(
        &self,
        request: &Envelope,
        payload: Value,
    ) -> Result<(), async_channel::SendError<Envelope>> {
        self.send(Envelope::with_id(
            request.correlation_id,
            request.kind.clone(),
            payload,
        ))
        .await
    }

    /// Send one text fragment on a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI stopped listening.
    pub async fn fragment(
        &self,
        request: &Envelope,
        text: &str,
    ) -> Result<(), async_channel::SendError<Envelope>> {
        self.reply(request, StreamPayload::Fragment(text.to_owned()).into_payload())
            .await
    }

    /// Send a stream's completion marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI stopped listening.
    pub async fn complete(
        &self,
        request: &Envelope,
        value: Value,
    ) -> Result<(), async_channel::SendError<Envelope>> {
        self.reply(request, StreamPayload::Complete(value).into_payload())
            .await
    }

    /// Issue a host-initiated request; returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI stopped listening.
    pub async fn request(
        &self,
        kind: &str,
        payload: Value,
    ) -> Result<CorrelationId, async_channel::SendError<Envelope>> {
        let envelope = Envelope::new(kind, payload);
        let id = envelope.correlation_id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Stop delivering to the UI; its listener sees the channel close.
    pub fn hang_up(&self) {
        self.to_ui.close();
    }
}
