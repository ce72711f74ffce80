//! Send primitives and the policy that picks one.
//!
//! A sandboxed UI can reach its host in more than one way depending on how
//! it was embedded. Each way is a [`Transport`]; a [`TransportSelector`]
//! decides on every send which one is reachable right now.

pub mod bridge;
pub mod channel;
pub mod selector;

use crate::{envelope::Envelope, error::TransportUnavailable, future::FutureKind};

pub use self::{
    bridge::HostBridge,
    channel::ChannelTransport,
    selector::{NoTransport, Selected, TransportSelector},
};

/// A way of delivering an [`Envelope`] to the host.
pub trait Transport<K: FutureKind> {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this transport can be used right now.
    ///
    /// This must be cheap: it is checked before every send.
    fn is_available(&self) -> bool;

    /// Hand the envelope to the underlying channel.
    ///
    /// Resolves once the channel has accepted the envelope, which says
    /// nothing about whether the host has processed it.
    fn send(&self, envelope: &Envelope) -> K::Future<'_, Result<(), TransportUnavailable>>;
}
