//! The reverse channel: the host calls, the UI answers.
//!
//! Host-initiated requests arrive through the same inbound path as replies.
//! Anything the registry does not recognize is looked up here by `kind`; the
//! handler runs in the background and its result goes back under the host's
//! own identifier. No registry entry is created for this direction.

use core::{fmt, future::Future, marker::PhantomData};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{
    future::{BoxFuture, LocalBoxFuture},
    FutureExt,
};
use serde_json::Value;

use crate::{
    dispatcher::{Dispatcher, ScheduleRetry},
    envelope::{error_payload, CorrelationId, Envelope},
    error::HandlerError,
    future::{FutureKind, Local, Sendable},
    operation::{self, HostOperation},
    spawn::Spawn,
    timer::Timer,
    transport::Transport,
};

/// Answers one kind of host request.
pub trait ReverseHandler<K: FutureKind> {
    /// Handle the request payload, producing the reply payload.
    fn handle(&self, payload: Value) -> K::Future<'static, Result<Value, HandlerError>>;
}

/// Storage for type-erased handlers of a [`FutureKind`].
pub trait HandlerKind: FutureKind + Sized {
    /// The erased handler type.
    type Handler: ReverseHandler<Self> + ?Sized;
}

impl HandlerKind for Sendable {
    type Handler = dyn ReverseHandler<Sendable> + Send + Sync;
}

impl HandlerKind for Local {
    type Handler = dyn ReverseHandler<Local>;
}

/// Conversion into an erased handler.
pub trait IntoHandler<K: HandlerKind> {
    /// Erase the handler's type.
    fn into_handler(self) -> Arc<K::Handler>;
}

impl<H: ReverseHandler<Sendable> + Send + Sync + 'static> IntoHandler<Sendable> for H {
    fn into_handler(self) -> Arc<dyn ReverseHandler<Sendable> + Send + Sync> {
        Arc::new(self)
    }
}

impl<H: ReverseHandler<Local> + 'static> IntoHandler<Local> for H {
    fn into_handler(self) -> Arc<dyn ReverseHandler<Local>> {
        Arc::new(self)
    }
}

/// A handler built from a closure over raw payloads.
pub struct FnHandler<F>(pub F);

impl<F, Fut> ReverseHandler<Sendable> for FnHandler<F>
where
    F: Fn(Value) -> Fut,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn handle(&self, payload: Value) -> BoxFuture<'static, Result<Value, HandlerError>> {
        (self.0)(payload).boxed()
    }
}

impl<F, Fut> ReverseHandler<Local> for FnHandler<F>
where
    F: Fn(Value) -> Fut,
    Fut: Future<Output = Result<Value, HandlerError>> + 'static,
{
    fn handle(&self, payload: Value) -> LocalBoxFuture<'static, Result<Value, HandlerError>> {
        (self.0)(payload).boxed_local()
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// A handler for a [`HostOperation`], decoding its request and encoding its
/// response.
pub struct OperationHandler<O, F> {
    handler: F,
    _op: PhantomData<fn() -> O>,
}

impl<O, F> OperationHandler<O, F> {
    /// Wrap a closure from `O::Request` to a future of `O::Response`.
    pub const fn new(handler: F) -> Self {
        Self {
            handler,
            _op: PhantomData,
        }
    }
}

async fn typed_reply<R, Fut>(fut: Result<Fut, HandlerError>) -> Result<Value, HandlerError>
where
    R: serde::Serialize,
    Fut: Future<Output = Result<R, HandlerError>>,
{
    let response = fut?.await?;
    Ok(serde_json::to_value(response)?)
}

impl<O, F, Fut> ReverseHandler<Sendable> for OperationHandler<O, F>
where
    O: HostOperation,
    O::Response: Send + 'static,
    F: Fn(O::Request) -> Fut,
    Fut: Future<Output = Result<O::Response, HandlerError>> + Send + 'static,
{
    fn handle(&self, payload: Value) -> BoxFuture<'static, Result<Value, HandlerError>> {
        let fut = operation::decode_host_request::<O::Request>(payload).map(|req| (self.handler)(req));
        typed_reply::<O::Response, _>(fut).boxed()
    }
}

impl<O, F, Fut> ReverseHandler<Local> for OperationHandler<O, F>
where
    O: HostOperation,
    O::Response: 'static,
    F: Fn(O::Request) -> Fut,
    Fut: Future<Output = Result<O::Response, HandlerError>> + 'static,
{
    fn handle(&self, payload: Value) -> LocalBoxFuture<'static, Result<Value, HandlerError>> {
        let fut = operation::decode_host_request::<O::Request>(payload).map(|req| (self.handler)(req));
        typed_reply::<O::Response, _>(fut).boxed_local()
    }
}

impl<O, F> fmt::Debug for OperationHandler<O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandler").finish_non_exhaustive()
    }
}

/// The reverse-routing table: `kind` to handler.
pub struct ReverseRouter<K: HandlerKind> {
    handlers: RwLock<HashMap<String, Arc<K::Handler>>>,
}

impl<K: HandlerKind> ReverseRouter<K> {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `kind`, replacing any previous handler.
    pub fn register(&self, kind: impl Into<String>, handler: impl IntoHandler<K>) {
        let kind = kind.into();
        tracing::debug!(%kind, "registering reverse handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler.into_handler());
    }

    /// Register a handler for a [`HostOperation`].
    pub fn register_operation<O, F>(&self, handler: F)
    where
        O: HostOperation,
        OperationHandler<O, F>: IntoHandler<K>,
    {
        self.register(O::KIND, OperationHandler::<O, F>::new(handler));
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn unregister(&self, kind: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kind)
            .is_some()
    }

    /// The handler for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<K::Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }
}

impl<K: HandlerKind> Default for ReverseRouter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: HandlerKind> fmt::Debug for ReverseRouter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ReverseRouter")
            .field("kinds", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn answer<K, T, Tm, S>(
    dispatcher: Dispatcher<K, T, Tm, S>,
    correlation_id: CorrelationId,
    kind: String,
    reply: K::Future<'static, Result<Value, HandlerError>>,
) where
    K: ScheduleRetry<T, Tm, S>,
    T: Transport<K>,
    Tm: Timer<K> + Clone,
    S: Spawn<K> + Clone,
{
    let payload = match reply.await {
        Ok(payload) => {
            #[cfg(feature = "metrics")]
            crate::metrics::host_request("ok");
            payload
        }
        Err(err) => {
            tracing::warn!(%correlation_id, %kind, %err, "reverse handler failed");
            #[cfg(feature = "metrics")]
            crate::metrics::host_request("error");
            error_payload(err.0)
        }
    };

    let _ = dispatcher
        .send_detached(Envelope::with_id(correlation_id, kind, payload))
        .await;
}

/// Boxes the reverse-handler task for a [`FutureKind`].
pub trait AnswerHost<T, Tm, S>: ScheduleRetry<T, Tm, S> + HandlerKind {
    /// Build the task that awaits `reply` and sends it back under the host's
    /// `correlation_id`.
    fn answer_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        correlation_id: CorrelationId,
        kind: String,
        reply: Self::Future<'static, Result<Value, HandlerError>>,
    ) -> Self::Future<'static, ()>;
}

impl<T, Tm, S> AnswerHost<T, Tm, S> for Sendable
where
    T: Transport<Sendable> + Send + Sync + 'static,
    Tm: Timer<Sendable> + Clone + Send + Sync + 'static,
    S: Spawn<Sendable> + Clone + Send + Sync + 'static,
{
    fn answer_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        correlation_id: CorrelationId,
        kind: String,
        reply: BoxFuture<'static, Result<Value, HandlerError>>,
    ) -> BoxFuture<'static, ()> {
        answer(dispatcher, correlation_id, kind, reply).boxed()
    }
}

impl<T, Tm, S> AnswerHost<T, Tm, S> for Local
where
    T: Transport<Local> + 'static,
    Tm: Timer<Local> + Clone + 'static,
    S: Spawn<Local> + Clone + 'static,
{
    fn answer_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        correlation_id: CorrelationId,
        kind: String,
        reply: LocalBoxFuture<'static, Result<Value, HandlerError>>,
    ) -> LocalBoxFuture<'static, ()> {
        answer(dispatcher, correlation_id, kind, reply).boxed_local()
    }
}
