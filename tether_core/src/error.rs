//! Error types.

use serde_json::Value;
use thiserror::Error;

/// No reachable send primitive, or the selected one refused the envelope.
///
/// Every transport failure is normalized into this one condition so the
/// dispatcher can drive its retry schedule without caring which host
/// integration was in use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport unavailable ({transport}): {reason}")]
pub struct TransportUnavailable {
    /// Name of the transport that failed, or `"none"` if none was reachable.
    pub transport: &'static str,

    /// Human-readable cause.
    pub reason: String,
}

impl TransportUnavailable {
    /// Create a new [`TransportUnavailable`].
    #[must_use]
    pub fn new(transport: &'static str, reason: impl Into<String>) -> Self {
        Self {
            transport,
            reason: reason.into(),
        }
    }

    /// No transport was reachable at all.
    #[must_use]
    pub fn no_transport() -> Self {
        Self::new("none", "no transport is reachable from this environment")
    }
}

/// Problem while waiting on a unary call or a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Every send attempt failed.
    #[error("request was never delivered after {attempts} attempts")]
    SendExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The call was cancelled and deregistered locally.
    #[error("call cancelled")]
    Cancelled,

    /// The registry was at capacity and dropped this entry.
    #[error("call evicted from a full registry")]
    Evicted,

    /// The transport went away; all in-flight correlations were abandoned.
    #[error("transport disconnected")]
    Disconnected,

    /// A caller-imposed deadline passed before a reply arrived.
    #[error("timed out waiting for a reply")]
    TimedOut,

    /// The resolver was dropped without a reply.
    #[error("response dropped")]
    ResponseDropped,

    /// The host replied with an error payload.
    #[error("host error: {0}")]
    Remote(String),

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The reply could not be decoded into the expected type.
    #[error("failed to decode reply: {0}")]
    Decode(String),
}

impl From<futures::channel::oneshot::Canceled> for CallError {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        CallError::ResponseDropped
    }
}

/// A reverse-channel handler failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create a new [`HandlerError`].
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// The peer sent something that does not fit the protocol.
///
/// These are logged and dropped, never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolViolation {
    /// A stream envelope was neither a text fragment nor a completion marker.
    #[error("unexpected stream payload: {0}")]
    UnexpectedStreamPayload(Value),
}
