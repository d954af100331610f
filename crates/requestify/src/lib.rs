//! Request/response correlation over a message-oriented transport.
//!
//! A transport that can only send opaque messages and deliver inbound ones
//! has no notion of a reply belonging to a request. [`Correlator`] adds it:
//! every outbound request is wrapped in an envelope with a fresh identifier,
//! and the peer echoes that identifier on its response.
//!
//! ```text
//! request:  { "id": "<unique-string>", "message": <any> }
//! response: { "id": "<unique-string>", "message": <any|null>, "error": <any|null> }
//! ```
//!
//! Both directions share one inbound stream. An envelope whose `id` matches a
//! pending request completes it; any other envelope is an incoming request
//! and is answered through the [`RequestHandler`] supplied at construction.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`correlator`] | [`Correlator`], [`ResponseFuture`] |
//! | [`transport`] | The [`Transport`] port and helpers for implementing it |
//! | [`handler`] | The [`RequestHandler`] port and stock handlers |
//! | [`envelope`] | Wire envelope parsing and encoding |
//! | [`config`] | [`CorrelatorConfig`] |
//! | [`identifiers`] | [`RequestId`] |
//! | [`errors`] | Error types |
//! | [`stats`] | Traffic counters |
//!
//! ## Example
//!
//! ```no_run
//! use requestify::{Correlator, CorrelatorConfig, NoRequestHandler, Transport};
//! use serde_json::json;
//!
//! async fn ping(transport: impl Transport) -> Result<(), Box<dyn std::error::Error>> {
//!     let correlator = Correlator::new(transport, NoRequestHandler, CorrelatorConfig::default())?;
//!     let pong = correlator.request(json!({ "op": "ping" })).await?;
//!     println!("{pong}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlator;
pub mod envelope;
pub mod errors;
pub mod handler;
pub mod identifiers;
mod pending;
pub mod stats;
pub mod transport;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{CorrelatorConfig, DEFAULT_REQUEST_TIMEOUT};
pub use correlator::{Correlator, ResponseFuture};
pub use envelope::Envelope;
pub use errors::{CorrelatorError, EnvelopeError, RequestError, TransportError};
pub use handler::{
    handler_fn, FnHandler, NoRequestHandler, RequestHandler, HANDLER_PANICKED_MESSAGE,
    NO_HANDLER_MESSAGE,
};
pub use identifiers::RequestId;
pub use stats::{CorrelatorStats, StatsSnapshot};
pub use transport::{InboundSlot, MessageHandler, RequestCapability, Transport};
