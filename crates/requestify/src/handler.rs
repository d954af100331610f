//! Inbound request handling.
//!
//! The embedding application answers requests from the peer by supplying a
//! [`RequestHandler`] when the correlator is built. Applications that only
//! ever issue requests pass [`NoRequestHandler`], which rejects everything.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Error value sent to the peer by [`NoRequestHandler`].
pub const NO_HANDLER_MESSAGE: &str = "No onrequest handler implemented";

/// Error value sent to the peer when the handler panics.
pub const HANDLER_PANICKED_MESSAGE: &str = "Request handler panicked";

/// Produces the response for one incoming request.
///
/// `Ok(value)` is sent back as the response `message`; `Err(value)` is sent
/// back as the response `error` and surfaces on the peer as
/// [`crate::RequestError::Remote`]. The correlator places no time bound on
/// this call: a handler that never completes never produces a response. A
/// handler that panics is answered with [`HANDLER_PANICKED_MESSAGE`].
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles the payload of one incoming request.
    async fn on_request(&self, message: Value) -> Result<Value, Value>;
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    async fn on_request(&self, message: Value) -> Result<Value, Value> {
        (**self).on_request(message).await
    }
}

/// Handler that rejects every request with [`NO_HANDLER_MESSAGE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRequestHandler;

#[async_trait]
impl RequestHandler for NoRequestHandler {
    async fn on_request(&self, _message: Value) -> Result<Value, Value> {
        Err(Value::String(NO_HANDLER_MESSAGE.to_string()))
    }
}

/// Adapter returned by [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Builds a [`RequestHandler`] from an async closure.
///
/// ```
/// use requestify::handler_fn;
/// use serde_json::{json, Value};
///
/// let echo = handler_fn(|message: Value| async move { Ok::<_, Value>(json!({ "echo": message })) });
/// # let _ = echo;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    async fn on_request(&self, message: Value) -> Result<Value, Value> {
        (self.f)(message).await
    }
}
