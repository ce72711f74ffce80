//! Picking a transport per send.

use futures::{
    future::{self, BoxFuture, LocalBoxFuture},
    FutureExt,
};

use super::Transport;
use crate::{
    envelope::Envelope,
    error::TransportUnavailable,
    future::{FutureKind, Local, Sendable},
};

/// A transport that is never available.
///
/// Fills the bridge slot when an embedder only offers a primary channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NoTransport;

impl Transport<Sendable> for NoTransport {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn send(&self, _envelope: &Envelope) -> BoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(Err(TransportUnavailable::no_transport())).boxed()
    }
}

impl Transport<Local> for NoTransport {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn send(&self, _envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(Err(TransportUnavailable::no_transport())).boxed_local()
    }
}

/// The transport chosen for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'a, P, B> {
    /// The structured channel.
    Primary(&'a P),

    /// The host-installed bridge.
    Bridge(&'a B),
}

/// Prefers `primary`, falls back to `bridge`.
///
/// Availability is checked on every send and never cached, since a host may
/// install or remove its integration at any time.
#[derive(Debug, Clone, Default)]
pub struct TransportSelector<P, B = NoTransport> {
    primary: P,
    bridge: B,
}

impl<P, B> TransportSelector<P, B> {
    /// Create a new [`TransportSelector`].
    pub const fn new(primary: P, bridge: B) -> Self {
        Self { primary, bridge }
    }

    /// The preferred transport.
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    /// The fallback transport.
    pub const fn bridge(&self) -> &B {
        &self.bridge
    }

    /// Choose a transport for the next send.
    ///
    /// # Errors
    ///
    /// Returns [`TransportUnavailable`] if neither transport is available.
    pub fn select<K: FutureKind>(&self) -> Result<Selected<'_, P, B>, TransportUnavailable>
    where
        P: Transport<K>,
        B: Transport<K>,
    {
        if self.primary.is_available() {
            return Ok(Selected::Primary(&self.primary));
        }

        if self.bridge.is_available() {
            tracing::debug!(
                primary = self.primary.name(),
                bridge = self.bridge.name(),
                "primary transport unavailable, using bridge"
            );
            return Ok(Selected::Bridge(&self.bridge));
        }

        tracing::warn!(
            primary = self.primary.name(),
            bridge = self.bridge.name(),
            "no transport available"
        );
        Err(TransportUnavailable::no_transport())
    }

    async fn send_selected<K: FutureKind>(
        &self,
        envelope: &Envelope,
    ) -> Result<(), TransportUnavailable>
    where
        P: Transport<K>,
        B: Transport<K>,
    {
        let fut = match self.select::<K>()? {
            Selected::Primary(primary) => primary.send(envelope),
            Selected::Bridge(bridge) => bridge.send(envelope),
        };
        fut.await
    }
}

impl<P, B> Transport<Sendable> for TransportSelector<P, B>
where
    P: Transport<Sendable> + Sync,
    B: Transport<Sendable> + Sync,
{
    fn name(&self) -> &'static str {
        "selector"
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.bridge.is_available()
    }

    fn send(&self, envelope: &Envelope) -> BoxFuture<'_, Result<(), TransportUnavailable>> {
        let envelope = envelope.clone();
        async move { self.send_selected::<Sendable>(&envelope).await }.boxed()
    }
}

impl<P, B> Transport<Local> for TransportSelector<P, B>
where
    P: Transport<Local>,
    B: Transport<Local>,
{
    fn name(&self) -> &'static str {
        "selector"
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.bridge.is_available()
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        let envelope = envelope.clone();
        async move { self.send_selected::<Local>(&envelope).await }.boxed_local()
    }
}
