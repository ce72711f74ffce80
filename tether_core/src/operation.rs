//! Typed operations.
//!
//! Each operation names its wire `kind` and the shapes of its request and
//! reply, so a mismatch between caller and handler is a compile error rather
//! than a runtime lookup failure.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use tether_core::operation::Operation;
//!
//! #[derive(Serialize)]
//! struct Echo {
//!     msg: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct Echoed {
//!     msg: String,
//! }
//!
//! struct EchoOp;
//!
//! impl Operation for EchoOp {
//!     const KIND: &'static str = "echo";
//!     type Request = Echo;
//!     type Response = Echoed;
//! }
//! ```

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    envelope::as_error_payload,
    error::{CallError, HandlerError},
};

/// A unary request the UI sends to the host.
pub trait Operation {
    /// The wire `kind`.
    const KIND: &'static str;

    /// Request payload.
    type Request: Serialize;

    /// Reply payload.
    type Response: DeserializeOwned;
}

/// A streaming request the UI sends to the host.
///
/// Fragments are text; the completion marker carries an [`Self::Output`].
pub trait StreamOperation {
    /// The wire `kind`.
    const KIND: &'static str;

    /// Request payload.
    type Request: Serialize;

    /// Terminal value.
    type Output: DeserializeOwned;
}

/// A request the host sends to the UI over the reverse channel.
pub trait HostOperation {
    /// The wire `kind`.
    const KIND: &'static str;

    /// Request payload.
    type Request: DeserializeOwned;

    /// Reply payload.
    type Response: Serialize;
}

/// Serialize a request payload.
///
/// # Errors
///
/// Returns [`CallError::Encode`] if serialization fails.
pub fn encode<T: Serialize + ?Sized>(request: &T) -> Result<Value, CallError> {
    serde_json::to_value(request).map_err(|e| CallError::Encode(e.to_string()))
}

/// Deserialize a reply payload, surfacing `{"error": ...}` as [`CallError::Remote`].
///
/// # Errors
///
/// Returns [`CallError::Remote`] for an error payload and
/// [`CallError::Decode`] if the payload does not fit `T`.
pub fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, CallError> {
    if let Some(message) = as_error_payload(&payload) {
        return Err(CallError::Remote(message.to_owned()));
    }
    serde_json::from_value(payload).map_err(|e| CallError::Decode(e.to_string()))
}

/// Deserialize a host request for a reverse-channel handler.
///
/// # Errors
///
/// Returns [`HandlerError`] if the payload does not fit `T`.
pub fn decode_host_request<T: DeserializeOwned>(payload: Value) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(payload)?)
}
