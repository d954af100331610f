//! The correlator: request/response matching over one transport.
//!
//! ```text
//! request():   register id ─► arm timer ─► transport.send({id, message})
//!                                               │
//! inbound ─► dispatch task ─► parse envelope ───┤
//!                              │ id pending?    │
//!                              ├─ yes ─► complete caller, abort timer
//!                              ├─ no, has "error" key ─► stale, drop
//!                              └─ no ─► spawn handler ─► send {id, message, error}
//! ```
//!
//! Inbound messages are processed in arrival order by a single dispatch task.
//! Handlers for incoming requests each run on their own task so a slow handler
//! never holds up unrelated traffic.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::config::saturating_millis;
use crate::envelope::{encode_request, encode_response, Envelope};
use crate::pending::{Completion, PendingTable};
use crate::stats::{CorrelatorStats, StatsSnapshot};
use crate::{
    CorrelatorConfig, CorrelatorError, MessageHandler, RequestError, RequestHandler, RequestId,
    Transport, HANDLER_PANICKED_MESSAGE,
};

/// State shared by the public handle, the dispatch task, timers, and handler
/// tasks.
struct Shared {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RequestHandler>,
    pending: Arc<PendingTable>,
    stats: Arc<CorrelatorStats>,
    config: CorrelatorConfig,
    runtime: Handle,
    closed: AtomicBool,
}

/// Shuts the correlator down when the last [`Correlator`] clone is dropped.
struct Lifecycle {
    shared: Arc<Shared>,
    dispatch: AbortHandle,
}

impl Lifecycle {
    fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatch.abort();
        let drained = self.shared.pending.close_all();
        debug!(drained, "Correlator closed");
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Request/response layer over a [`Transport`].
///
/// Cloning is cheap; all clones share one pending table and one dispatch task.
/// Dropping the last clone closes the correlator.
#[derive(Clone)]
pub struct Correlator {
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("config", &self.shared.config)
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Correlator {
    /// Wraps `transport`, answering incoming requests with `handler`.
    ///
    /// Installs the dispatch callback on the transport, replacing any callback
    /// it had, and spawns the dispatch task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`CorrelatorError::InvalidConfig`] if `config` fails validation.
    /// - [`CorrelatorError::NoRuntime`] outside a Tokio runtime.
    /// - [`CorrelatorError::AlreadyWrapped`] if the transport is already
    ///   wrapped by another correlator.
    pub fn new<T, H>(transport: T, handler: H, config: CorrelatorConfig) -> Result<Self, CorrelatorError>
    where
        T: Transport,
        H: RequestHandler,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| CorrelatorError::NoRuntime)?;

        if !transport.claim_request_capability() {
            return Err(CorrelatorError::AlreadyWrapped);
        }

        let shared = Arc::new(Shared {
            transport: Arc::new(transport),
            handler: Arc::new(handler),
            pending: Arc::new(PendingTable::new()),
            stats: Arc::new(CorrelatorStats::default()),
            config,
            runtime,
            closed: AtomicBool::new(false),
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let on_message: MessageHandler = Arc::new(move |raw: String| {
            if inbound_tx.send(raw).is_err() {
                trace!("Correlator closed; inbound message discarded");
            }
        });
        shared.transport.set_on_message(on_message);

        let dispatch = shared
            .runtime
            .spawn(run_dispatch(Arc::clone(&shared), inbound_rx))
            .abort_handle();

        debug!(
            timeout_ms = saturating_millis(config.request_timeout),
            "Correlator installed on transport"
        );

        Ok(Self {
            lifecycle: Arc::new(Lifecycle {
                shared: Arc::clone(&shared),
                dispatch,
            }),
            shared,
        })
    }

    /// Sends a request and waits for its response.
    ///
    /// Resolves with the peer's response `message`, or fails with
    /// [`RequestError::Remote`] carrying the peer's `error`, or with
    /// [`RequestError::Timeout`] once the configured deadline passes.
    pub async fn request(&self, message: Value) -> Result<Value, RequestError> {
        self.send_request(message).await?.await
    }

    /// Typed variant of [`Correlator::request`].
    pub async fn request_as<T, R>(&self, message: &T) -> Result<R, RequestError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = serde_json::to_value(message).map_err(RequestError::Encode)?;
        let response = self.request(value).await?;
        serde_json::from_value(response).map_err(RequestError::Decode)
    }

    /// Sends a request and returns as soon as the envelope has been handed to
    /// the transport.
    ///
    /// The returned [`ResponseFuture`] completes exactly once: with the
    /// response, with a timeout, or with [`RequestError::Closed`] if the
    /// correlator shuts down first.
    pub async fn send_request(&self, message: Value) -> Result<ResponseFuture, RequestError> {
        let shared = &self.shared;
        let (id, rx) = shared.pending.register();
        // Checked after registering so a concurrent close cannot miss the entry.
        if shared.closed.load(Ordering::Acquire) {
            shared.pending.discard(&id);
            return Err(RequestError::Closed);
        }
        let raw = match encode_request(&id, &message) {
            Ok(raw) => raw,
            Err(err) => {
                shared.pending.discard(&id);
                return Err(RequestError::Encode(err));
            }
        };

        let timeout = shared.config.request_timeout;
        let timer = {
            let pending = Arc::clone(&shared.pending);
            let stats = Arc::clone(&shared.stats);
            let id = id.clone();
            shared.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if pending.expire(&id, timeout) {
                    CorrelatorStats::bump(&stats.timeouts);
                }
            })
        };
        shared.pending.attach_timer(&id, timer.abort_handle());

        if let Err(err) = shared.transport.send(raw).await {
            shared.pending.discard(&id);
            CorrelatorStats::bump(&shared.stats.send_failures);
            warn!(request_id = %id, error = %err, "Failed to send request");
            return Err(err.into());
        }

        CorrelatorStats::bump(&shared.stats.requests_sent);
        debug!(request_id = %id, "Request sent");
        Ok(ResponseFuture { id, rx })
    }

    /// Number of requests awaiting a response or timeout.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Returns `true` while a request with `id` is awaiting completion.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.shared.pending.contains(id)
    }

    /// Point-in-time traffic counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The configuration this correlator was built with.
    pub fn config(&self) -> &CorrelatorConfig {
        &self.shared.config
    }

    /// Returns `true` once [`Correlator::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stops dispatching inbound messages and fails every pending request
    /// with [`RequestError::Closed`].
    ///
    /// The transport stays claimed; it cannot be wrapped again.
    pub fn close(&self) {
        self.lifecycle.shutdown();
    }
}

async fn run_dispatch(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(raw) = inbound.recv().await {
        shared.dispatch(raw);
    }
    debug!("Inbound channel closed; dispatch loop exiting");
}

impl Shared {
    fn dispatch(self: &Arc<Self>, raw: String) {
        let envelope = match Envelope::parse(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                CorrelatorStats::bump(&self.stats.unrecognized);
                warn!(error = %err, bytes = raw.len(), "Ignoring unrecognized inbound message");
                return;
            }
        };

        if self.pending.contains(&envelope.id) {
            let id = envelope.id.clone();
            if self.pending.complete(&id, envelope.into_outcome()) {
                CorrelatorStats::bump(&self.stats.responses_matched);
            } else {
                // Expired between the lookup and the removal.
                CorrelatorStats::bump(&self.stats.stale_responses);
                debug!(request_id = %id, "Response raced its timeout; dropped");
            }
            return;
        }

        if envelope.is_response_shaped() {
            CorrelatorStats::bump(&self.stats.stale_responses);
            debug!(request_id = %envelope.id, "Response for unknown or expired request; dropped");
            return;
        }

        CorrelatorStats::bump(&self.stats.requests_received);
        let span = debug_span!("inbound_request", request_id = %envelope.id);
        let shared = Arc::clone(self);
        self.runtime.spawn(async move { shared.answer(envelope).await }.instrument(span));
    }

    async fn answer(&self, envelope: Envelope) {
        let Envelope { id, message, .. } = envelope;
        let handler = Arc::clone(&self.handler);
        let call = self
            .runtime
            .spawn(async move { handler.on_request(message).await }.in_current_span());
        let outcome = match call.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                warn!("Request handler panicked");
                Err(Value::String(HANDLER_PANICKED_MESSAGE.to_string()))
            }
            Err(_) => {
                debug!("Request handler cancelled; response not sent");
                return;
            }
        };

        if self.closed.load(Ordering::Acquire) {
            debug!("Correlator closed while handling request; response not sent");
            return;
        }

        let raw = match encode_response(&id, &outcome) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Failed to encode response");
                return;
            }
        };

        match self.transport.send(raw).await {
            Ok(()) => {
                CorrelatorStats::bump(&self.stats.responses_sent);
                debug!(failed = outcome.is_err(), "Response sent");
            }
            Err(err) => {
                CorrelatorStats::bump(&self.stats.send_failures);
                warn!(error = %err, "Failed to send response");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseFuture
// ---------------------------------------------------------------------------

/// Outcome handle for one in-flight request.
///
/// Dropping it abandons interest in the response; the pending entry is still
/// cleaned up by the response or the timeout.
#[derive(Debug)]
#[must_use = "the response is only observed by awaiting the future"]
pub struct ResponseFuture {
    id: RequestId,
    rx: oneshot::Receiver<Completion>,
}

impl ResponseFuture {
    /// Identifier carried by the request envelope.
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(completion)) => Poll::Ready(completion),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
