//! Counters describing correlator traffic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters for one correlator.
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Request envelopes handed to the transport.
    pub requests_sent: AtomicU64,
    /// Responses matched to a pending request.
    pub responses_matched: AtomicU64,
    /// Pending requests that expired.
    pub timeouts: AtomicU64,
    /// Request envelopes received from the peer.
    pub requests_received: AtomicU64,
    /// Response envelopes sent back to the peer.
    pub responses_sent: AtomicU64,
    /// Responses whose id matched nothing pending.
    pub stale_responses: AtomicU64,
    /// Inbound payloads that did not parse as an envelope.
    pub unrecognized: AtomicU64,
    /// Outbound envelopes the transport refused.
    pub send_failures: AtomicU64,
}

impl CorrelatorStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requests_sent: load(&self.requests_sent),
            responses_matched: load(&self.responses_matched),
            timeouts: load(&self.timeouts),
            requests_received: load(&self.requests_received),
            responses_sent: load(&self.responses_sent),
            stale_responses: load(&self.stale_responses),
            unrecognized: load(&self.unrecognized),
            send_failures: load(&self.send_failures),
        }
    }
}

/// Plain copy of [`CorrelatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub timeouts: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub stale_responses: u64,
    pub unrecognized: u64,
    pub send_failures: u64,
}
