//! A bridge function the host installs on `globalThis`.

use futures::{
    future::{self, LocalBoxFuture},
    FutureExt,
};
use tether_core::{future::Local, transport::Transport, Envelope, TransportUnavailable};
use wasm_bindgen::{prelude::*, JsCast};

use super::global_property;
use crate::convert;

const NAME: &str = "global_bridge";

/// Calls `globalThis[function](kind, payload, correlationId)` while
/// `globalThis[marker]` is truthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalBridgeTransport {
    marker: String,
    function: String,
}

impl GlobalBridgeTransport {
    /// Create a new [`GlobalBridgeTransport`].
    #[must_use]
    pub fn new(marker: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            function: function.into(),
        }
    }

    fn has_marker(&self) -> bool {
        global_property(&self.marker).is_some_and(|marker| marker.is_truthy())
    }

    fn function(&self) -> Option<js_sys::Function> {
        global_property(&self.function)?
            .dyn_into::<js_sys::Function>()
            .ok()
    }

    fn invoke(&self, envelope: &Envelope) -> Result<(), TransportUnavailable> {
        if !self.has_marker() {
            return Err(TransportUnavailable::new(
                NAME,
                format!("globalThis.{} is not set", self.marker),
            ));
        }
        let function = self.function().ok_or_else(|| {
            TransportUnavailable::new(NAME, format!("globalThis.{} is not a function", self.function))
        })?;
        let payload =
            convert::to_js(&envelope.payload).map_err(|e| TransportUnavailable::new(NAME, e.to_string()))?;

        function
            .call3(
                &JsValue::NULL,
                &JsValue::from_str(&envelope.kind),
                &payload,
                &JsValue::from_str(&envelope.correlation_id.to_string()),
            )
            .map_err(|thrown| TransportUnavailable::new(NAME, convert::describe(&thrown)))?;
        Ok(())
    }
}

impl Transport<Local> for GlobalBridgeTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.has_marker() && self.function().is_some()
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.invoke(envelope)).boxed_local()
    }
}
