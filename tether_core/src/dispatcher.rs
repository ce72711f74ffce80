//! Outbound dispatch with retry.
//!
//! The first attempt runs inline. If it fails, the remaining attempts are
//! handed to a background task so the caller is never held up by the backoff
//! schedule. Once every attempt has failed the send is abandoned: nothing is
//! thrown back at the caller.

use core::{fmt, marker::PhantomData};
use std::sync::Arc;

use futures::{
    future::{BoxFuture, LocalBoxFuture},
    FutureExt,
};
use serde_json::Value;

use crate::{
    backoff::RetryPolicy,
    envelope::{CorrelationId, Envelope},
    error::{CallError, TransportUnavailable},
    future::{FutureKind, Local, Sendable},
    registry::Registry,
    spawn::Spawn,
    timer::Timer,
    transport::Transport,
};

/// The outcome of handing an envelope to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// The first attempt was accepted by the transport.
    Sent(CorrelationId),

    /// The first attempt failed; retries continue in the background.
    Retrying(CorrelationId),

    /// The first attempt failed and the policy allows no retries.
    Abandoned(CorrelationId),
}

impl Delivery {
    /// The identifier the envelope was sent with.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        match self {
            Delivery::Sent(id) | Delivery::Retrying(id) | Delivery::Abandoned(id) => *id,
        }
    }

    /// Whether the first attempt went through.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent(_))
    }
}

/// Whether an outbound envelope owns the registry entry under its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The request that opened the entry; exhaustion fails its waiter.
    Waiter,

    /// Reuses an identifier owned elsewhere; exhaustion is only logged.
    Detached,
}

/// Sends envelopes through a transport, retrying with backoff.
pub struct Dispatcher<K: FutureKind, T, Tm, S> {
    transport: Arc<T>,
    timer: Tm,
    spawner: S,
    registry: Registry,
    policy: RetryPolicy,
    surface_exhaustion: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: FutureKind, T, Tm, S> Dispatcher<K, T, Tm, S> {
    /// Create a new [`Dispatcher`].
    ///
    /// Exhausted sends fail the matching `registry` entry by default; see
    /// [`Dispatcher::with_surface_exhaustion`].
    pub fn new(transport: T, timer: Tm, spawner: S, registry: Registry, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            timer,
            spawner,
            registry,
            policy,
            surface_exhaustion: true,
            _kind: PhantomData,
        }
    }

    /// Whether a waiter on an exhausted send is failed with
    /// [`CallError::SendExhausted`].
    ///
    /// When disabled, the waiter stays registered until it is cancelled,
    /// evicted, abandoned, or times out.
    #[must_use]
    pub const fn with_surface_exhaustion(mut self, surface: bool) -> Self {
        self.surface_exhaustion = surface;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The registry notified on exhaustion.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The retry policy.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The timer used for backoff delays.
    pub const fn timer(&self) -> &Tm {
        &self.timer
    }

    /// The spawner used for background work.
    pub const fn spawner(&self) -> &S {
        &self.spawner
    }

    async fn give_up(&self, envelope: &Envelope, owner: Owner) {
        let attempts = self.policy.attempts();
        tracing::error!(
            correlation_id = %envelope.correlation_id,
            kind = %envelope.kind,
            attempts,
            "send failed on every attempt, giving up"
        );

        #[cfg(feature = "metrics")]
        crate::metrics::send_exhausted();

        if owner == Owner::Waiter
            && self.surface_exhaustion
            && self
                .registry
                .fail(envelope.correlation_id, CallError::SendExhausted { attempts })
                .await
        {
            tracing::debug!(
                correlation_id = %envelope.correlation_id,
                "failed pending entry after exhaustion"
            );
        }
    }
}

impl<K, T, Tm, S> Dispatcher<K, T, Tm, S>
where
    K: FutureKind,
    T: Transport<K>,
{
    /// Make a single attempt, without retry.
    ///
    /// # Errors
    ///
    /// Returns [`TransportUnavailable`] if the transport refused the envelope.
    pub async fn attempt(&self, envelope: &Envelope) -> Result<(), TransportUnavailable> {
        self.transport.send(envelope).await
    }
}

impl<K, T, Tm, S> Dispatcher<K, T, Tm, S>
where
    K: ScheduleRetry<T, Tm, S>,
    T: Transport<K>,
    Tm: Timer<K> + Clone,
    S: Spawn<K> + Clone,
{
    /// Send `payload` under `kind`.
    ///
    /// A fresh [`CorrelationId`] is generated when `correlation_id` is `None`.
    pub async fn send(
        &self,
        kind: impl Into<String>,
        payload: Value,
        correlation_id: Option<CorrelationId>,
    ) -> Delivery {
        let id = correlation_id.unwrap_or_else(CorrelationId::generate);
        self.send_envelope(Envelope::with_id(id, kind, payload)).await
    }

    /// Send a prepared envelope.
    ///
    /// The envelope is taken to be the request behind any registry entry
    /// under its identifier, so exhaustion fails that entry.
    pub async fn send_envelope(&self, envelope: Envelope) -> Delivery {
        self.dispatch(envelope, Owner::Waiter).await
    }

    /// Send an envelope that borrows an identifier it does not own, such as
    /// an `abort` or a reply to a host request.
    ///
    /// Exhaustion is only logged; whatever is registered under the
    /// identifier is left alone.
    pub async fn send_detached(&self, envelope: Envelope) -> Delivery {
        self.dispatch(envelope, Owner::Detached).await
    }

    async fn dispatch(&self, envelope: Envelope, owner: Owner) -> Delivery {
        let id = envelope.correlation_id;
        match self.attempt(&envelope).await {
            Ok(()) => {
                tracing::debug!(correlation_id = %id, kind = %envelope.kind, "sent");
                Delivery::Sent(id)
            }
            Err(err) => {
                tracing::warn!(correlation_id = %id, kind = %envelope.kind, %err, "send attempt 0 failed");
                if self.policy.attempts() <= 1 {
                    self.give_up(&envelope, owner).await;
                    return Delivery::Abandoned(id);
                }
                let _handle = self
                    .spawner
                    .spawn(K::retry_task(self.clone(), envelope, owner));
                Delivery::Retrying(id)
            }
        }
    }
}

async fn retry_remaining<K, T, Tm, S>(
    dispatcher: Dispatcher<K, T, Tm, S>,
    envelope: Envelope,
    owner: Owner,
) where
    K: FutureKind,
    T: Transport<K>,
    Tm: Timer<K>,
{
    let id = envelope.correlation_id;
    for (attempt, delay) in (1_usize..).zip(dispatcher.policy.delays()) {
        tracing::debug!(correlation_id = %id, attempt, ?delay, "waiting before retry");
        dispatcher.timer.sleep(delay).await;

        #[cfg(feature = "metrics")]
        crate::metrics::send_retried();

        match dispatcher.attempt(&envelope).await {
            Ok(()) => {
                tracing::info!(correlation_id = %id, kind = %envelope.kind, attempt, "sent after retry");
                return;
            }
            Err(err) => {
                tracing::warn!(correlation_id = %id, kind = %envelope.kind, attempt, %err, "send attempt failed");
            }
        }
    }

    dispatcher.give_up(&envelope, owner).await;
}

/// Boxes the background retry task for a [`FutureKind`].
pub trait ScheduleRetry<T, Tm, S>: FutureKind + Sized {
    /// Build the task that runs the remaining attempts for `envelope`.
    fn retry_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        envelope: Envelope,
        owner: Owner,
    ) -> Self::Future<'static, ()>;
}

impl<T, Tm, S> ScheduleRetry<T, Tm, S> for Sendable
where
    T: Transport<Sendable> + Send + Sync + 'static,
    Tm: Timer<Sendable> + Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn retry_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        envelope: Envelope,
        owner: Owner,
    ) -> BoxFuture<'static, ()> {
        retry_remaining(dispatcher, envelope, owner).boxed()
    }
}

impl<T, Tm, S> ScheduleRetry<T, Tm, S> for Local
where
    T: Transport<Local> + 'static,
    Tm: Timer<Local> + 'static,
    S: 'static,
{
    fn retry_task(
        dispatcher: Dispatcher<Self, T, Tm, S>,
        envelope: Envelope,
        owner: Owner,
    ) -> LocalBoxFuture<'static, ()> {
        retry_remaining(dispatcher, envelope, owner).boxed_local()
    }
}

impl<K: FutureKind, T, Tm: Clone, S: Clone> Clone for Dispatcher<K, T, Tm, S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            timer: self.timer.clone(),
            spawner: self.spawner.clone(),
            registry: self.registry.clone(),
            policy: self.policy,
            surface_exhaustion: self.surface_exhaustion,
            _kind: PhantomData,
        }
    }
}

impl<K: FutureKind, T, Tm, S> fmt::Debug for Dispatcher<K, T, Tm, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("surface_exhaustion", &self.surface_exhaustion)
            .finish_non_exhaustive()
    }
}
