//! Wire envelope.
//!
//! ```text
//! request:  { "id": "<unique-string>", "message": <any> }
//! response: { "id": "<unique-string>", "message": <any|null>, "error": <any|null> }
//! ```
//!
//! Inbound payloads are parsed strictly: anything that is not a JSON object
//! with a non-empty string `id` is rejected with an [`EnvelopeError`]. Whether
//! a valid envelope is a request or a response is decided by the correlator's
//! pending table, not by the envelope itself.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{EnvelopeError, RequestId};

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation identifier.
    pub id: RequestId,

    /// Application payload. `null` when the field was absent.
    pub message: Value,

    /// The `error` field exactly as received.
    ///
    /// `None` when the key is absent, `Some(Value::Null)` when present but
    /// null. [`Envelope::into_outcome`] reads it with completion semantics.
    pub error: Option<Value>,
}

impl Envelope {
    /// Parses one raw transport message.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let Value::Object(map) = serde_json::from_str::<Value>(raw)? else {
            return Err(EnvelopeError::NotAnObject);
        };
        Self::from_map(map)
    }

    fn from_map(mut map: Map<String, Value>) -> Result<Self, EnvelopeError> {
        let id = match map.remove("id") {
            Some(Value::String(s)) => RequestId::new(s).ok_or(EnvelopeError::MissingId)?,
            _ => return Err(EnvelopeError::MissingId),
        };
        Ok(Self {
            id,
            message: map.remove("message").unwrap_or(Value::Null),
            error: map.remove("error"),
        })
    }

    /// Returns `true` if the envelope carries the `error` key at all, which
    /// only response envelopes do.
    pub fn is_response_shaped(&self) -> bool {
        self.error.is_some()
    }

    /// Converts a response envelope into the caller-facing outcome.
    ///
    /// A non-null `error` takes precedence over any `message` carried
    /// alongside it.
    pub fn into_outcome(self) -> Result<Value, Value> {
        match self.error {
            Some(error) if !error.is_null() => Err(error),
            _ => Ok(self.message),
        }
    }
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: &'a RequestId,
    message: &'a Value,
}

#[derive(Serialize)]
struct ResponseFrame<'a> {
    id: &'a RequestId,
    message: &'a Value,
    error: &'a Value,
}

/// Serialises a request envelope.
pub fn encode_request(id: &RequestId, message: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&RequestFrame { id, message })
}

/// Serialises a response envelope for the outcome of a request handler.
///
/// Success produces `{id, message, error: null}`; failure produces
/// `{id, message: null, error}`.
pub fn encode_response(id: &RequestId, outcome: &Result<Value, Value>) -> serde_json::Result<String> {
    let frame = match outcome {
        Ok(message) => ResponseFrame {
            id,
            message,
            error: &Value::Null,
        },
        Err(error) => ResponseFrame {
            id,
            message: &Value::Null,
            error,
        },
    };
    serde_json::to_string(&frame)
}
