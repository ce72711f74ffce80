//! Error types.

use tether_core::CallError;
use thiserror::Error;
use wasm_bindgen::prelude::*;

use crate::convert::ConversionError;

/// A Wasm wrapper around the [`CallError`] type.
///
/// Rejects as a JS `Error` whose `name` is the variant, so callers can
/// branch on `err.name === "TimedOut"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(transparent)]
pub struct WasmCallError(#[from] CallError);

impl WasmCallError {
    /// The JS `name` used for this error.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self.0 {
            CallError::SendExhausted { .. } => "SendExhausted",
            CallError::Cancelled => "Cancelled",
            CallError::Evicted => "Evicted",
            CallError::Disconnected => "Disconnected",
            CallError::TimedOut => "TimedOut",
            CallError::ResponseDropped => "ResponseDropped",
            CallError::Remote(_) => "RemoteError",
            CallError::Encode(_) => "EncodeError",
            CallError::Decode(_) => "DecodeError",
        }
    }
}

impl From<ConversionError> for WasmCallError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Json(msg) | ConversionError::Threw(msg) => {
                WasmCallError(CallError::Encode(msg))
            }
        }
    }
}

impl From<WasmCallError> for JsValue {
    fn from(err: WasmCallError) -> Self {
        let js_err = js_sys::Error::new(&err.0.to_string());
        js_err.set_name(err.name());
        js_err.into()
    }
}
