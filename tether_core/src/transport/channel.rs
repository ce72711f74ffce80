//! In-process structured channel.
//!
//! The native analogue of a structured-clone message port: envelopes are
//! moved whole through an [`async_channel`] rather than serialized.

use futures::{
    future::{BoxFuture, LocalBoxFuture},
    FutureExt,
};

use super::Transport;
use crate::{
    envelope::Envelope,
    error::TransportUnavailable,
    future::{Local, Sendable},
};

const NAME: &str = "channel";

/// A [`Transport`] that pushes envelopes into an [`async_channel::Sender`].
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outbound: async_channel::Sender<Envelope>,
}

impl ChannelTransport {
    /// Wrap an existing sender.
    #[must_use]
    pub const fn new(outbound: async_channel::Sender<Envelope>) -> Self {
        Self { outbound }
    }

    /// Create a transport together with the receiving end the host reads.
    #[must_use]
    pub fn unbounded() -> (Self, async_channel::Receiver<Envelope>) {
        let (tx, rx) = async_channel::unbounded();
        (Self::new(tx), rx)
    }

    /// Close the channel; every later send fails.
    pub fn close(&self) {
        self.outbound.close();
    }

    async fn push(&self, envelope: Envelope) -> Result<(), TransportUnavailable> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| TransportUnavailable::new(NAME, "receiving end closed"))
    }
}

impl Transport<Sendable> for ChannelTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn send(&self, envelope: &Envelope) -> BoxFuture<'_, Result<(), TransportUnavailable>> {
        self.push(envelope.clone()).boxed()
    }
}

impl Transport<Local> for ChannelTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        self.push(envelope.clone()).boxed_local()
    }
}
