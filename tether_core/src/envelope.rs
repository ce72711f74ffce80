//! The unit exchanged over the channel.
//!
//! Every [`Envelope`] carries a [`CorrelationId`] generated by whichever side
//! initiated the exchange. The receiving side never interprets the `kind`
//! when matching replies: identifiers alone decide where an envelope goes.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtocolViolation;

/// The `kind` of the advisory cancellation notification for a stream.
pub const ABORT_KIND: &str = "abort";

/// Field that marks a stream completion payload.
const DONE_FIELD: &str = "done";

/// Field holding the terminal value of a stream completion payload.
const VALUE_FIELD: &str = "value";

/// Field holding a handler failure in a reply payload.
const ERROR_FIELD: &str = "error";

/// An opaque identifier correlating a request with everything sent in reply.
///
/// Identifiers are UUID v4 values. They are unique for the lifetime of a
/// session and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh, random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing [`Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying [`Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One message on the wire.
///
/// Serializes as `{"correlationId": "...", "kind": "...", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Routes the envelope back to the pending call or stream it belongs to.
    pub correlation_id: CorrelationId,

    /// The operation name.
    pub kind: String,

    /// Operation-specific data.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with a freshly generated [`CorrelationId`].
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self::with_id(CorrelationId::generate(), kind, payload)
    }

    /// Create an envelope reusing an existing [`CorrelationId`].
    #[must_use]
    pub fn with_id(correlation_id: CorrelationId, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id,
            kind: kind.into(),
            payload,
        }
    }

    /// The advisory abort notification for the stream with the given identifier.
    #[must_use]
    pub fn abort(correlation_id: CorrelationId) -> Self {
        Self::with_id(correlation_id, ABORT_KIND, Value::Null)
    }

    /// Whether this is an abort notification.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.kind == ABORT_KIND
    }

    /// Encode as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a well-formed envelope.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// How an inbound payload on a stream's identifier is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// An incremental piece of content.
    Fragment(String),

    /// The stream is over; carries the terminal value.
    Complete(Value),
}

impl StreamPayload {
    /// Classify a raw payload.
    ///
    /// An object with `"done": true` is a completion whose terminal value is
    /// its `"value"` member (`null` when absent). A string is a fragment.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation`] for any other payload shape.
    pub fn classify(payload: Value) -> Result<Self, ProtocolViolation> {
        match payload {
            Value::String(fragment) => Ok(Self::Fragment(fragment)),
            Value::Object(mut fields)
                if fields.get(DONE_FIELD).and_then(Value::as_bool) == Some(true) =>
            {
                Ok(Self::Complete(fields.remove(VALUE_FIELD).unwrap_or(Value::Null)))
            }
            other => Err(ProtocolViolation::UnexpectedStreamPayload(other)),
        }
    }

    /// Encode back into the payload shape a host sends.
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            Self::Fragment(fragment) => Value::String(fragment),
            Self::Complete(value) => {
                let mut fields = Map::new();
                fields.insert(DONE_FIELD.into(), Value::Bool(true));
                fields.insert(VALUE_FIELD.into(), value);
                Value::Object(fields)
            }
        }
    }
}

/// Build the reply payload for a failed reverse-channel handler.
#[must_use]
pub fn error_payload(message: impl Into<String>) -> Value {
    let mut fields = Map::new();
    fields.insert(ERROR_FIELD.into(), Value::String(message.into()));
    Value::Object(fields)
}

/// If the payload is exactly `{"error": "<message>"}`, return the message.
#[must_use]
pub fn as_error_payload(payload: &Value) -> Option<&str> {
    match payload {
        Value::Object(fields) if fields.len() == 1 => {
            fields.get(ERROR_FIELD).and_then(Value::as_str)
        }
        _ => None,
    }
}
