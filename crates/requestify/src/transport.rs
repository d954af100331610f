//! The transport port.
//!
//! A [`Transport`] is the bidirectional, message-oriented channel the
//! correlator wraps. It only needs to send opaque string payloads and deliver
//! inbound payloads one at a time to a single installed callback.
//!
//! Two helpers make implementing the trait straightforward:
//!
//! - [`RequestCapability`] tracks whether a correlator has already claimed the
//!   transport.
//! - [`InboundSlot`] holds the installed callback and buffers messages that
//!   arrive before one is installed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use crate::TransportError;

/// Callback invoked by a transport for every inbound message.
///
/// Implementations must be cheap and non-blocking; the correlator's callback
/// only forwards the payload to its dispatch task.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// A bidirectional message channel that can be wrapped by a
/// [`crate::Correlator`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transmits one opaque payload to the peer.
    async fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Installs the inbound delivery callback, replacing any previous one.
    fn set_on_message(&self, handler: MessageHandler);

    /// Atomically marks the transport as carrying a request layer.
    ///
    /// Returns `false` if the capability was already claimed.
    fn claim_request_capability(&self) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        (**self).send(payload).await
    }

    fn set_on_message(&self, handler: MessageHandler) {
        (**self).set_on_message(handler)
    }

    fn claim_request_capability(&self) -> bool {
        (**self).claim_request_capability()
    }
}

// ---------------------------------------------------------------------------
// RequestCapability
// ---------------------------------------------------------------------------

/// One-shot claim flag for [`Transport::claim_request_capability`].
#[derive(Debug, Default)]
pub struct RequestCapability {
    claimed: AtomicBool,
}

impl RequestCapability {
    /// Creates an unclaimed capability.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the capability. Only the first call returns `true`.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once the capability has been claimed.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// InboundSlot
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    handler: Option<MessageHandler>,
    backlog: VecDeque<String>,
    draining: bool,
}

/// Inbound delivery point for transport implementations.
///
/// Messages are handed to the installed handler one at a time, in arrival
/// order. Messages delivered while no handler is installed are kept and
/// flushed to the first handler installed. A message delivered while another
/// thread is feeding the handler is queued behind it and handed over by that
/// thread.
#[derive(Default)]
pub struct InboundSlot {
    state: Mutex<SlotState>,
}

impl InboundSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler`, replacing any previous one, and flushes the backlog
    /// into it.
    pub fn install(&self, handler: MessageHandler) {
        {
            let mut state = lock(&self.state);
            state.handler = Some(handler);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Delivers one inbound message to the installed handler, or buffers it.
    pub fn deliver(&self, message: String) {
        {
            let mut state = lock(&self.state);
            state.backlog.push_back(message);
            if state.draining {
                return;
            }
            if state.handler.is_none() {
                trace!(buffered = state.backlog.len(), "No inbound handler yet; buffering");
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Returns `true` if a handler is installed.
    pub fn has_handler(&self) -> bool {
        lock(&self.state).handler.is_some()
    }

    /// Feeds queued messages to the handler until the queue is empty.
    ///
    /// Only the caller that set `draining` runs this. The handler is re-read
    /// for every message so a concurrent `install` takes effect immediately.
    fn drain(&self) {
        loop {
            let (handler, message) = {
                let mut state = lock(&self.state);
                let next = match state.handler.clone() {
                    Some(handler) => state.backlog.pop_front().map(|message| (handler, message)),
                    None => None,
                };
                match next {
                    Some(pair) => pair,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            // Handlers always run outside the lock.
            handler(message);
        }
    }
}

fn lock(state: &Mutex<SlotState>) -> std::sync::MutexGuard<'_, SlotState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |m: String| sink.lock().unwrap().push(m));
        (handler, seen)
    }

    #[test]
    fn test_capability_claims_once() {
        let cap = RequestCapability::new();
        assert!(!cap.is_claimed());
        assert!(cap.claim());
        assert!(!cap.claim());
        assert!(cap.is_claimed());
    }

    #[test]
    fn test_slot_buffers_until_installed() {
        let slot = InboundSlot::new();
        slot.deliver("one".into());
        slot.deliver("two".into());
        assert!(!slot.has_handler());

        let (handler, seen) = collecting();
        slot.install(handler);
        slot.deliver("three".into());

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_slot_keeps_order_when_delivering_during_flush() {
        let slot = Arc::new(InboundSlot::new());
        slot.deliver("one".into());
        slot.deliver("two".into());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let weak = Arc::downgrade(&slot);
        let handler: MessageHandler = Arc::new(move |m: String| {
            if m == "one" {
                let weak = weak.clone();
                std::thread::spawn(move || {
                    if let Some(slot) = weak.upgrade() {
                        slot.deliver("three".into());
                    }
                })
                .join()
                .unwrap();
            }
            sink.lock().unwrap().push(m);
        });
        slot.install(handler);

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_slot_reentrant_deliver_is_queued() {
        let slot = Arc::new(InboundSlot::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let weak = Arc::downgrade(&slot);
        let handler: MessageHandler = Arc::new(move |m: String| {
            sink.lock().unwrap().push(m.clone());
            if m == "first" {
                if let Some(slot) = weak.upgrade() {
                    slot.deliver("nested".into());
                }
                sink.lock().unwrap().push("first-done".into());
            }
        });
        slot.install(handler);
        slot.deliver("first".into());
        slot.deliver("last".into());

        assert_eq!(*seen.lock().unwrap(), vec!["first", "first-done", "nested", "last"]);
    }

    #[test]
    fn test_slot_install_replaces_previous_handler() {
        let slot = InboundSlot::new();
        let (first, first_seen) = collecting();
        let (second, second_seen) = collecting();

        slot.install(first);
        slot.deliver("a".into());
        slot.install(second);
        slot.deliver("b".into());

        assert_eq!(*first_seen.lock().unwrap(), vec!["a"]);
        assert_eq!(*second_seen.lock().unwrap(), vec!["b"]);
    }
}
