//! In-process transport pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use requestify::{InboundSlot, MessageHandler, RequestCapability, Transport, TransportError};
use tracing::trace;

#[derive(Default)]
struct Endpoint {
    inbound: InboundSlot,
    capability: RequestCapability,
}

/// One end of an in-process, bidirectional message channel.
///
/// Created in connected pairs by [`MemoryTransport::pair`]. A message sent on
/// one end is delivered to the other end's installed handler, or buffered
/// until one is installed. Closing either end closes both.
pub struct MemoryTransport {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Creates two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                local: Arc::clone(&a),
                remote: Arc::clone(&b),
                closed: Arc::clone(&closed),
            },
            Self {
                local: b,
                remote: a,
                closed,
            },
        )
    }

    /// Closes the link; later sends on either end fail with
    /// [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns `true` once either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        trace!(bytes = payload.len(), "memory transport send");
        self.remote.inbound.deliver(payload);
        Ok(())
    }

    fn set_on_message(&self, handler: MessageHandler) {
        self.local.inbound.install(handler);
    }

    fn claim_request_capability(&self) -> bool {
        self.local.capability.claim()
    }
}
