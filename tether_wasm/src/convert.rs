//! Moving JSON values across the JS boundary.
//!
//! Payloads cross as plain JS values, so they survive a structured clone on
//! the other side. Everything goes through `JSON.stringify`/`JSON.parse`,
//! which keeps the mapping identical to what the host sees on the wire.

use serde_json::Value;
use tether_core::Envelope;
use thiserror::Error;
use wasm_bindgen::{prelude::*, JsCast};

/// A value could not be carried across the JS boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// `serde_json` rejected the value.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// `JSON.stringify` or `JSON.parse` threw.
    #[error("JSON conversion threw: {0}")]
    Threw(String),
}

/// Turn a JSON value into a plain JS value.
///
/// # Errors
///
/// Returns [`ConversionError`] if the value cannot be rebuilt in JS.
pub fn to_js(value: &Value) -> Result<JsValue, ConversionError> {
    let text = serde_json::to_string(value).map_err(|e| ConversionError::Json(e.to_string()))?;
    js_sys::JSON::parse(&text).map_err(|err| ConversionError::Threw(describe(&err)))
}

/// Read a JS value as JSON.
///
/// `undefined` and functions read as `null`.
///
/// # Errors
///
/// Returns [`ConversionError`] if the value is not representable as JSON,
/// for example a `BigInt` or a cyclic object.
pub fn from_js(value: &JsValue) -> Result<Value, ConversionError> {
    if value.is_undefined() || value.is_function() {
        return Ok(Value::Null);
    }

    let text = js_sys::JSON::stringify(value).map_err(|err| ConversionError::Threw(describe(&err)))?;
    let text: String = text.into();
    serde_json::from_str(&text).map_err(|e| ConversionError::Json(e.to_string()))
}

/// Build the plain object posted for an envelope:
/// `{correlationId, kind, payload}`.
///
/// # Errors
///
/// Returns [`ConversionError`] if the payload cannot be rebuilt in JS.
pub fn envelope_to_js(envelope: &Envelope) -> Result<JsValue, ConversionError> {
    let value = serde_json::to_value(envelope).map_err(|e| ConversionError::Json(e.to_string()))?;
    to_js(&value)
}

/// Read an inbound message as an [`Envelope`].
///
/// # Errors
///
/// Returns [`ConversionError`] if the message is not an envelope.
pub fn envelope_from_js(message: &JsValue) -> Result<Envelope, ConversionError> {
    let value = from_js(message)?;
    serde_json::from_value(value).map_err(|e| ConversionError::Json(e.to_string()))
}

/// Best-effort text for a thrown JS value.
#[must_use]
pub fn describe(thrown: &JsValue) -> String {
    if let Some(err) = thrown.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    thrown.as_string().unwrap_or_else(|| format!("{thrown:?}"))
}

impl From<ConversionError> for JsValue {
    fn from(err: ConversionError) -> Self {
        let js_err = js_sys::TypeError::new(&err.to_string());
        js_err.into()
    }
}
