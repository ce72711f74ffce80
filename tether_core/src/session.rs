//! The public face of the protocol.
//!
//! A [`Session`] owns one registry, one reverse router, and one dispatcher
//! over a [`TransportSelector`]. Outbound calls register before they send so
//! that a fast reply is never mistaken for a host request. Inbound envelopes
//! all go through [`Session::handle_inbound`], one at a time, which keeps
//! envelopes for the same identifier in arrival order.

use core::{fmt, pin::pin, time::Duration};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::{
    cancel::{AbortNotice, CancelSignal, WatchCancel},
    config::SessionConfig,
    dispatcher::{Delivery, Dispatcher, ScheduleRetry},
    envelope::{CorrelationId, Envelope},
    error::CallError,
    operation::{self, Operation, StreamOperation},
    registry::{Registry, Routed, UnaryWaiter},
    reverse::{AnswerHost, HandlerKind, IntoHandler, OperationHandler, ReverseHandler, ReverseRouter},
    spawn::Spawn,
    stream::ResponseStream,
    timer::{self, Timer},
    transport::{Transport, TransportSelector},
};

/// A trait alias for the kinds of futures a [`Session`] can run on.
///
/// Saves repeating the per-task boxing bounds on every method.
pub trait TetherFutureKind<T, Tm, S>:
    ScheduleRetry<T, Tm, S> + WatchCancel<T, Tm, S> + AnswerHost<T, Tm, S>
{
}

impl<K, T, Tm, S> TetherFutureKind<T, Tm, S> for K where
    K: ScheduleRetry<T, Tm, S> + WatchCancel<T, Tm, S> + AnswerHost<T, Tm, S>
{
}

/// A stream opened through a [`Session`].
pub type SessionStream<K, P, B, Tm, S, O = Value> =
    ResponseStream<K, TransportSelector<P, B>, Tm, S, O>;

/// What [`Session::handle_inbound`] did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inbound {
    /// Resolved a pending unary call.
    Resolved,

    /// Fed a fragment to an active stream.
    Fed,

    /// Completed an active stream.
    Completed,

    /// Belonged to a finished call or stream; ignored.
    Inert,

    /// Matched a stream but was malformed; ignored.
    Rejected,

    /// Started a reverse-channel handler.
    HostRequest,

    /// Matched nothing and no handler exists for its `kind`; dropped.
    Unhandled,
}

/// One side of a Tether conversation.
pub struct Session<K: HandlerKind, P, B, Tm, S> {
    dispatcher: Dispatcher<K, TransportSelector<P, B>, Tm, S>,
    registry: Registry,
    router: Arc<ReverseRouter<K>>,
    config: SessionConfig,
}

impl<K, P, B, Tm, S> Session<K, P, B, Tm, S>
where
    K: HandlerKind,
{
    /// Create a new [`Session`] sending through `primary`, falling back to
    /// `bridge`.
    pub fn new(primary: P, bridge: B, timer: Tm, spawner: S, config: SessionConfig) -> Self {
        let registry = Registry::new(config.max_pending, config.max_tombstones);
        let dispatcher = Dispatcher::new(
            TransportSelector::new(primary, bridge),
            timer,
            spawner,
            registry.clone(),
            config.retry,
        )
        .with_surface_exhaustion(config.surface_exhaustion);

        Self {
            dispatcher,
            registry,
            router: Arc::new(ReverseRouter::new()),
            config,
        }
    }

    /// The configuration this session was built with.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The transports in use.
    pub fn transports(&self) -> &TransportSelector<P, B> {
        self.dispatcher.transport()
    }

    /// The outbound dispatcher.
    pub const fn dispatcher(&self) -> &Dispatcher<K, TransportSelector<P, B>, Tm, S> {
        &self.dispatcher
    }

    /// The correlation registry.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The reverse-routing table.
    pub fn router(&self) -> &ReverseRouter<K> {
        &self.router
    }

    /// Answer host requests of `kind` with `handler`.
    pub fn register_handler(&self, kind: impl Into<String>, handler: impl IntoHandler<K>) {
        self.router.register(kind, handler);
    }

    /// Answer host requests for a typed operation.
    pub fn register_operation<O, F>(&self, handler: F)
    where
        O: crate::operation::HostOperation,
        OperationHandler<O, F>: IntoHandler<K>,
    {
        self.router.register_operation::<O, F>(handler);
    }

    /// Number of outstanding calls and streams.
    pub async fn pending_count(&self) -> usize {
        self.registry.len().await
    }

    /// Cancel a pending call or stream locally.
    ///
    /// Its waiter sees [`CallError::Cancelled`]. Nothing is sent to the host;
    /// use [`ResponseStream::abort`] for that. Returns whether anything was
    /// pending under `correlation_id`.
    pub async fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.registry.cancel(correlation_id).await
    }

    /// The transport is gone: abandon every in-flight call and stream.
    ///
    /// Returns how many were abandoned.
    pub async fn disconnect(&self) -> usize {
        self.registry.abandon_all().await
    }
}

impl<K, P, B, Tm, S> Session<K, P, B, Tm, S>
where
    K: HandlerKind + TetherFutureKind<TransportSelector<P, B>, Tm, S>,
    TransportSelector<P, B>: Transport<K>,
    Tm: Timer<K> + Clone,
    S: Spawn<K> + Clone,
{
    /// Call a typed operation and wait for its reply.
    ///
    /// Waits indefinitely unless [`SessionConfig::default_deadline`] is set.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the request cannot be encoded, the call
    /// fails locally, the host replies with an error, or the reply does not
    /// decode.
    pub async fn call<O: Operation>(&self, request: &O::Request) -> Result<O::Response, CallError> {
        let payload = operation::encode(request)?;
        let reply = self
            .unary(O::KIND, payload, self.config.default_deadline)
            .await?;
        operation::decode(reply)
    }

    /// Call a typed operation, giving up after `deadline`.
    ///
    /// # Errors
    ///
    /// As [`Session::call`], plus [`CallError::TimedOut`] if no reply
    /// arrived in time.
    pub async fn call_with_deadline<O: Operation>(
        &self,
        request: &O::Request,
        deadline: Duration,
    ) -> Result<O::Response, CallError> {
        let payload = operation::encode(request)?;
        let reply = self.unary(O::KIND, payload, Some(deadline)).await?;
        operation::decode(reply)
    }

    /// Call by `kind` with a raw payload.
    ///
    /// The reply payload is returned as is, including `{"error": ...}`
    /// payloads.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the call fails locally.
    pub async fn call_raw(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<Value, CallError> {
        self.unary(kind, payload, self.config.default_deadline).await
    }

    /// Call by `kind` with a raw payload, giving up after `deadline`.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the call fails locally or times out.
    pub async fn call_raw_with_deadline(
        &self,
        kind: impl Into<String>,
        payload: Value,
        deadline: Duration,
    ) -> Result<Value, CallError> {
        self.unary(kind, payload, Some(deadline)).await
    }

    async fn unary(
        &self,
        kind: impl Into<String>,
        payload: Value,
        deadline: Option<Duration>,
    ) -> Result<Value, CallError> {
        let id = CorrelationId::generate();
        let waiter = self.registry.register_unary(id).await;

        #[cfg(feature = "metrics")]
        crate::metrics::call_started();

        let _ = self.dispatcher.send(kind, payload, Some(id)).await;

        match deadline {
            None => waiter.await?,
            Some(deadline) => self.wait_with_deadline(id, waiter, deadline).await,
        }
    }

    async fn wait_with_deadline(
        &self,
        id: CorrelationId,
        waiter: UnaryWaiter,
        deadline: Duration,
    ) -> Result<Value, CallError> {
        let timer = self.dispatcher.timer();
        match timer::with_deadline::<K, Tm, _>(timer, deadline, waiter).await {
            Ok(reply) => reply?,
            Err(timer::Elapsed) => {
                tracing::warn!(correlation_id = %id, ?deadline, "no reply before deadline");
                self.registry.deregister(id).await;
                Err(CallError::TimedOut)
            }
        }
    }

    /// Send without expecting a reply.
    ///
    /// Never fails: if every attempt fails the notification is dropped and
    /// the failure is only logged.
    pub async fn notify(&self, kind: impl Into<String>, payload: Value) -> Delivery {
        self.dispatcher.send(kind, payload, None).await
    }

    /// Reply to a host request, reusing the host's identifier.
    ///
    /// No registry entry is created; one reply per host request is assumed.
    pub async fn respond(
        &self,
        kind: impl Into<String>,
        payload: Value,
        correlation_id: CorrelationId,
    ) -> Delivery {
        self.dispatcher
            .send_detached(Envelope::with_id(correlation_id, kind, payload))
            .await
    }

    /// Open a typed stream.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Encode`] if the request cannot be encoded.
    pub async fn stream<O: StreamOperation>(
        &self,
        request: &O::Request,
    ) -> Result<SessionStream<K, P, B, Tm, S, O::Output>, CallError> {
        let payload = operation::encode(request)?;
        Ok(self.open_stream(O::KIND, payload, None).await)
    }

    /// Open a typed stream that asks the host to abort when `cancel` completes.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Encode`] if the request cannot be encoded.
    pub async fn stream_with_cancel<O: StreamOperation>(
        &self,
        request: &O::Request,
        cancel: impl CancelSignal<K>,
    ) -> Result<SessionStream<K, P, B, Tm, S, O::Output>, CallError> {
        let payload = operation::encode(request)?;
        Ok(self
            .open_stream(O::KIND, payload, Some(cancel.into_signal()))
            .await)
    }

    /// Open a stream by `kind` with a raw payload.
    pub async fn stream_raw(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> SessionStream<K, P, B, Tm, S> {
        self.open_stream(kind, payload, None).await
    }

    /// Open a raw stream that asks the host to abort when `cancel` completes.
    pub async fn stream_raw_with_cancel(
        &self,
        kind: impl Into<String>,
        payload: Value,
        cancel: impl CancelSignal<K>,
    ) -> SessionStream<K, P, B, Tm, S> {
        self.open_stream(kind, payload, Some(cancel.into_signal()))
            .await
    }

    async fn open_stream<O>(
        &self,
        kind: impl Into<String>,
        payload: Value,
        cancel: Option<K::Future<'static, ()>>,
    ) -> SessionStream<K, P, B, Tm, S, O> {
        let id = CorrelationId::generate();
        let events = self.registry.register_stream(id).await;
        let notice = AbortNotice::new(id);

        #[cfg(feature = "metrics")]
        crate::metrics::stream_started();

        let stream = ResponseStream::new(events, notice.clone(), self.dispatcher.clone());
        let _ = self.dispatcher.send(kind, payload, Some(id)).await;

        // The abort must not overtake the request it cancels.
        match cancel {
            Some(signal) => {
                let watcher = K::watch_task(self.dispatcher.clone(), notice, signal);
                stream.with_watcher(self.dispatcher.spawner().spawn(watcher))
            }
            None => stream,
        }
    }

    /// Route one inbound envelope.
    ///
    /// Replies go to their pending call or stream by identifier. Anything
    /// unmatched is treated as a host request and dispatched by `kind`.
    pub async fn handle_inbound(&self, envelope: Envelope) -> Inbound {
        match self.registry.route(envelope).await {
            Routed::Resolved => Inbound::Resolved,
            Routed::Fed => Inbound::Fed,
            Routed::Completed => Inbound::Completed,
            Routed::Inert => Inbound::Inert,
            Routed::Rejected => Inbound::Rejected,
            Routed::Unmatched(envelope) => self.dispatch_host_request(envelope),
        }
    }

    fn dispatch_host_request(&self, envelope: Envelope) -> Inbound {
        let Envelope {
            correlation_id,
            kind,
            payload,
        } = envelope;

        let Some(handler) = self.router.get(&kind) else {
            tracing::warn!(%correlation_id, %kind, "no handler for inbound envelope, dropping");
            #[cfg(feature = "metrics")]
            crate::metrics::host_request("unhandled");
            return Inbound::Unhandled;
        };

        tracing::debug!(%correlation_id, %kind, "handling host request");
        let reply = ReverseHandler::<K>::handle(&*handler, payload);
        let task = K::answer_task(self.dispatcher.clone(), correlation_id, kind, reply);
        let _handle = self.dispatcher.spawner().spawn(task);
        Inbound::HostRequest
    }

    /// Route every envelope from `inbound` until it ends, then abandon
    /// everything still in flight.
    pub async fn listen<I>(&self, inbound: I)
    where
        I: Stream<Item = Envelope>,
    {
        tracing::info!("listening for inbound envelopes");
        let mut inbound = pin!(inbound);
        while let Some(envelope) = inbound.next().await {
            let outcome = self.handle_inbound(envelope).await;
            tracing::trace!(?outcome, "routed inbound envelope");
        }

        let abandoned = self.disconnect().await;
        tracing::info!(abandoned, "inbound channel closed");
    }
}

impl<K: HandlerKind, P, B, Tm: Clone, S: Clone> Clone for Session<K, P, B, Tm, S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            router: self.router.clone(),
            config: self.config,
        }
    }
}

impl<K: HandlerKind, P, B, Tm, S> fmt::Debug for Session<K, P, B, Tm, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
