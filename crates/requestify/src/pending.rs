//! Pending-request table.
//!
//! Maps request identifiers to the completion handle of the caller waiting on
//! them. Removal from the table is the single point where a request is
//! decided: whichever of response, timeout, or shutdown removes the entry
//! completes the caller, and every later attempt finds nothing and is a no-op.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::saturating_millis;
use crate::{RequestError, RequestId};

/// What a waiting caller eventually receives.
pub(crate) type Completion = Result<Value, RequestError>;

struct PendingRequest {
    sender: oneshot::Sender<Completion>,
    created_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn finish(self, id: &RequestId, completion: Completion) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if self.sender.send(completion).is_err() {
            debug!(request_id = %id, "Caller dropped its response handle");
        }
    }
}

/// Instance-scoped table of in-flight outbound requests.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a new entry under a freshly generated identifier that is not
    /// currently pending.
    pub(crate) fn register(&self) -> (RequestId, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries();
        let mut id = RequestId::generate();
        while entries.contains_key(&id) {
            warn!(request_id = %id, "Generated request id collides with a pending one; regenerating");
            id = RequestId::generate();
        }
        entries.insert(
            id.clone(),
            PendingRequest {
                sender: tx,
                created_at: Instant::now(),
                timer: None,
            },
        );
        (id, rx)
    }

    /// Attaches the timeout task to its entry.
    ///
    /// If the entry is already gone the timer is aborted immediately.
    pub(crate) fn attach_timer(&self, id: &RequestId, timer: AbortHandle) {
        match self.entries().get_mut(id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Completes the entry for `id` with a response outcome.
    ///
    /// Returns `false` if nothing was pending under `id`.
    pub(crate) fn complete(&self, id: &RequestId, outcome: Result<Value, Value>) -> bool {
        let Some(entry) = self.entries().remove(id) else {
            return false;
        };
        debug!(
            request_id = %id,
            elapsed_ms = saturating_millis(entry.created_at.elapsed()),
            failed = outcome.is_err(),
            "Response matched pending request"
        );
        entry.finish(id, outcome.map_err(RequestError::Remote));
        true
    }

    /// Fails the entry for `id` with a timeout.
    ///
    /// Returns `false` if the entry was already completed.
    pub(crate) fn expire(&self, id: &RequestId, after: Duration) -> bool {
        let Some(mut entry) = self.entries().remove(id) else {
            return false;
        };
        warn!(
            request_id = %id,
            timeout_ms = saturating_millis(after),
            "Request timed out"
        );
        // The timer is the caller here; aborting it would cancel ourselves.
        entry.timer = None;
        entry.finish(
            id,
            Err(RequestError::Timeout {
                id: id.clone(),
                after,
            }),
        );
        true
    }

    /// Removes the entry for `id` without completing the caller.
    pub(crate) fn discard(&self, id: &RequestId) -> bool {
        match self.entries().remove(id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Fails every pending entry with [`RequestError::Closed`].
    ///
    /// Returns the number of entries drained.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.finish(&id, Err(RequestError::Closed));
        }
        count
    }

    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.entries().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}
