//! Error types for the correlation layer.
//!
//! [`CorrelatorError`] covers the construction-time conditions that indicate a
//! programming error in the embedding application. Everything that can go
//! wrong at runtime is reported per request through [`RequestError`] and never
//! escapes the dispatch loop.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::RequestId;

// ---------------------------------------------------------------------------
// Construction errors
// ---------------------------------------------------------------------------

/// Errors returned by [`crate::Correlator::new`].
#[derive(Debug, Error)]
pub enum CorrelatorError {
    /// The transport's request capability has already been claimed, usually
    /// because another correlator already wraps it.
    #[error("Transport already has a request layer installed")]
    AlreadyWrapped,

    /// No Tokio runtime is available to run the dispatch loop and timers.
    #[error("Correlator must be constructed inside a Tokio runtime")]
    NoRuntime,

    /// The supplied [`crate::CorrelatorConfig`] failed validation.
    #[error("Configuration error: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying byte stream failed.
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed; no further messages can be sent.
    #[error("Transport is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Envelope errors
// ---------------------------------------------------------------------------

/// Reasons an inbound payload is not a valid envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The payload is not valid JSON.
    #[error("Envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but not an object.
    #[error("Envelope must be a JSON object")]
    NotAnObject,

    /// The `id` field is missing, empty, or not a string.
    #[error("Envelope has no usable 'id' field")]
    MissingId,
}

// ---------------------------------------------------------------------------
// Per-request errors
// ---------------------------------------------------------------------------

/// Why an outbound request did not produce a response value.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No matching response arrived before the deadline.
    #[error("Request {id} timed out after {} ms", .after.as_millis())]
    Timeout {
        /// Identifier of the request that expired.
        id: RequestId,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The peer's request handler failed. The value is passed through exactly
    /// as the peer sent it.
    #[error("Remote error: {0}")]
    Remote(Value),

    /// The request envelope could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be serialised.
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The response payload did not deserialise into the requested type.
    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The correlator shut down before the request completed.
    #[error("Correlator closed before the request completed")]
    Closed,
}

impl RequestError {
    /// Returns `true` for [`RequestError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the peer-supplied error value for [`RequestError::Remote`].
    pub fn remote_value(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }
}
