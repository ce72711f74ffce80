//! The `Tether` class exposed to JS.

use core::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tether_core::{
    future::Local, timer::FuturesTimer, transport::Transport, CallError, CorrelationId, Envelope,
    Session,
};
use wasm_bindgen::prelude::*;
use web_sys::AbortSignal;

use crate::{
    convert::{self, ConversionError},
    error::WasmCallError,
    handler::JsHandler,
    options::TetherOptions,
    signal,
    spawn::WasmSpawn,
    transport::{GlobalBridgeTransport, PostMessageTransport},
};

/// The session type behind [`WasmTether`].
pub type BrowserSession =
    Session<Local, PostMessageTransport, GlobalBridgeTransport, FuturesTimer, WasmSpawn>;

/// Wasm bindings for a [`Session`] running in the page.
///
/// Inbound messages are queued by [`WasmTether::handle_inbound`] and routed
/// one at a time by a listener started in the constructor.
#[wasm_bindgen(js_name = Tether)]
#[derive(Debug, Clone)]
pub struct WasmTether {
    session: BrowserSession,
    inbound: async_channel::Sender<Envelope>,
}

#[wasm_bindgen(js_class = Tether)]
impl WasmTether {
    /// Create a new [`WasmTether`] from an optional options object.
    ///
    /// # Errors
    ///
    /// Throws a `TypeError` if the options are malformed.
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> Result<WasmTether, JsValue> {
        let options = if options.is_undefined() || options.is_null() {
            TetherOptions::default()
        } else {
            serde_json::from_value(convert::from_js(&options)?)
                .map_err(|e| ConversionError::Json(e.to_string()))?
        };
        Ok(Self::with_options(options))
    }

    /// Call the host and wait for its reply.
    ///
    /// Without `timeoutMs` the configured default deadline applies, if any.
    ///
    /// # Errors
    ///
    /// Rejects with an `Error` named after the failure, e.g. `TimedOut`.
    #[wasm_bindgen]
    pub async fn call(
        &self,
        kind: String,
        payload: JsValue,
        timeout_ms: Option<u32>,
    ) -> Result<JsValue, JsValue> {
        let payload = convert::from_js(&payload).map_err(WasmCallError::from)?;
        let reply = match timeout_ms {
            Some(ms) => {
                self.session
                    .call_raw_with_deadline(kind, payload, Duration::from_millis(u64::from(ms)))
                    .await
            }
            None => self.session.call_raw(kind, payload).await,
        }
        .map_err(WasmCallError::from)?;
        Ok(convert::to_js(&reply)?)
    }

    /// Send without waiting for a reply.
    ///
    /// Resolves to whether the first attempt went through; failed sends keep
    /// retrying in the background.
    ///
    /// # Errors
    ///
    /// Throws a `TypeError` if the payload is not representable as JSON.
    #[wasm_bindgen]
    pub async fn notify(&self, kind: String, payload: JsValue) -> Result<bool, JsValue> {
        let payload = convert::from_js(&payload)?;
        Ok(self.session.notify(kind, payload).await.is_sent())
    }

    /// Reply to a host request, reusing its identifier.
    ///
    /// # Errors
    ///
    /// Throws a `TypeError` if the identifier or payload is malformed.
    #[wasm_bindgen]
    pub async fn respond(
        &self,
        kind: String,
        payload: JsValue,
        correlation_id: String,
    ) -> Result<bool, JsValue> {
        let id = parse_id(&correlation_id)?;
        let payload = convert::from_js(&payload)?;
        Ok(self.session.respond(kind, payload, id).await.is_sent())
    }

    /// Open a stream, calling `onChunk` with each text chunk.
    ///
    /// Resolves to the terminal value once the host completes the stream.
    /// Aborting `signal` asks the host to stop; the promise still waits for
    /// the host's completion marker.
    ///
    /// # Errors
    ///
    /// Rejects with an `Error` named after the failure that ended the stream.
    #[wasm_bindgen]
    pub async fn stream(
        &self,
        kind: String,
        payload: JsValue,
        on_chunk: js_sys::Function,
        signal: Option<AbortSignal>,
    ) -> Result<JsValue, JsValue> {
        let payload = convert::from_js(&payload).map_err(WasmCallError::from)?;
        let mut stream = match signal {
            Some(signal) => {
                self.session
                    .stream_raw_with_cancel(kind, payload, signal::aborted(signal))
                    .await
            }
            None => self.session.stream_raw(kind, payload).await,
        };

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(WasmCallError::from)?;
            if let Err(thrown) = on_chunk.call1(&JsValue::NULL, &JsValue::from_str(&chunk)) {
                tracing::warn!(
                    correlation_id = %stream.correlation_id(),
                    error = %convert::describe(&thrown),
                    "onChunk threw"
                );
            }
        }

        Ok(convert::to_js(stream.terminal().unwrap_or(&Value::Null))?)
    }

    /// Answer host requests of `kind` with `handler`.
    ///
    /// The handler receives the payload and may return a value or a promise.
    #[wasm_bindgen(js_name = registerHandler)]
    pub fn register_handler(&self, kind: String, handler: js_sys::Function) {
        self.session.register_handler(kind, JsHandler::new(handler));
    }

    /// Stop answering host requests of `kind`.
    #[wasm_bindgen(js_name = unregisterHandler)]
    pub fn unregister_handler(&self, kind: &str) -> bool {
        self.session.router().unregister(kind)
    }

    /// Queue a message received from the host.
    ///
    /// # Errors
    ///
    /// Throws a `TypeError` if the message is not an envelope, or a
    /// `Disconnected` error after [`WasmTether::disconnect`].
    #[wasm_bindgen(js_name = handleInbound)]
    pub fn handle_inbound(&self, message: JsValue) -> Result<(), JsValue> {
        let envelope = convert::envelope_from_js(&message)?;
        self.inbound
            .try_send(envelope)
            .map_err(|_| WasmCallError::from(CallError::Disconnected))?;
        Ok(())
    }

    /// Cancel a pending call or stream locally.
    ///
    /// # Errors
    ///
    /// Throws a `TypeError` if the identifier is malformed.
    #[wasm_bindgen]
    pub async fn cancel(&self, correlation_id: String) -> Result<bool, JsValue> {
        let id = parse_id(&correlation_id)?;
        Ok(self.session.cancel(id).await)
    }

    /// Number of outstanding calls and streams.
    #[wasm_bindgen(js_name = pendingCount)]
    pub async fn pending_count(&self) -> u32 {
        u32::try_from(self.session.pending_count().await).unwrap_or(u32::MAX)
    }

    /// The transport the next send would use, if any.
    #[wasm_bindgen(getter, js_name = activeTransport)]
    pub fn active_transport(&self) -> Option<String> {
        let transports = self.session.transports();
        if Transport::<Local>::is_available(transports.primary()) {
            Some(Transport::<Local>::name(transports.primary()).to_owned())
        } else if Transport::<Local>::is_available(transports.bridge()) {
            Some(Transport::<Local>::name(transports.bridge()).to_owned())
        } else {
            None
        }
    }

    /// Stop routing inbound messages and abandon everything in flight.
    ///
    /// Returns `false` if already disconnected.
    #[wasm_bindgen]
    pub fn disconnect(&self) -> bool {
        self.inbound.close()
    }
}

impl WasmTether {
    /// Build a session and start its inbound listener.
    #[must_use]
    pub fn with_options(options: TetherOptions) -> Self {
        let TetherOptions {
            channel,
            bridge_marker,
            bridge_function,
            config,
        } = options;

        tracing::debug!(%channel, %bridge_marker, %bridge_function, "new Tether session");
        let session = Session::new(
            PostMessageTransport::new(channel),
            GlobalBridgeTransport::new(bridge_marker, bridge_function),
            FuturesTimer,
            WasmSpawn,
            config,
        );

        let (inbound, queued) = async_channel::unbounded();
        let listener = session.clone();
        wasm_bindgen_futures::spawn_local(async move {
            listener.listen(queued).await;
        });

        Self { session, inbound }
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &BrowserSession {
        &self.session
    }
}

fn parse_id(text: &str) -> Result<CorrelationId, ConversionError> {
    text.parse()
        .map_err(|e: uuid::Error| ConversionError::Json(format!("bad correlation id {text:?}: {e}")))
}
