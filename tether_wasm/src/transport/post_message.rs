//! The structured-clone channel.

use futures::{
    future::{self, LocalBoxFuture},
    FutureExt,
};
use tether_core::{future::Local, transport::Transport, Envelope, TransportUnavailable};
use wasm_bindgen::{prelude::*, JsCast};

use super::global_property;
use crate::convert;

const NAME: &str = "post_message";

/// Posts envelopes as plain objects to `globalThis[channel].postMessage`.
///
/// The target can be anything with a `postMessage` method: a `MessagePort`,
/// a parent `Window`, or a worker scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessageTransport {
    channel: String,
}

impl PostMessageTransport {
    /// Create a new [`PostMessageTransport`] reading `globalThis[channel]`.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// The global property name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn target(&self) -> Option<(JsValue, js_sys::Function)> {
        let holder = global_property(&self.channel)?;
        let post = js_sys::Reflect::get(&holder, &JsValue::from_str("postMessage")).ok()?;
        let post = post.dyn_into::<js_sys::Function>().ok()?;
        Some((holder, post))
    }

    fn post(&self, envelope: &Envelope) -> Result<(), TransportUnavailable> {
        let (holder, post) = self.target().ok_or_else(|| {
            TransportUnavailable::new(NAME, format!("globalThis.{} cannot postMessage", self.channel))
        })?;
        let message =
            convert::envelope_to_js(envelope).map_err(|e| TransportUnavailable::new(NAME, e.to_string()))?;

        post.call1(&holder, &message)
            .map_err(|thrown| TransportUnavailable::new(NAME, convert::describe(&thrown)))?;
        Ok(())
    }
}

impl Transport<Local> for PostMessageTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.target().is_some()
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.post(envelope)).boxed_local()
    }
}
