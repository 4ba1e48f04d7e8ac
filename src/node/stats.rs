//! Per-node delivery counters.

use serde::Serialize;

/// One set of counters, kept once for events and once for bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Delivered to the peer, live or from the backlog.
    pub sent: u64,
    /// Received from the peer.
    pub read: u64,
    /// Currently waiting in the backlog.
    pub logged: u64,
    /// Lost because the backlog was full or could not take an entry back.
    pub dropped: u64,
    /// Lost because the backlog was found corrupt and wiped.
    pub wiped: u64,
}

impl Counters {
    pub(crate) fn log(&mut self, n: u64) {
        self.logged += n;
    }

    pub(crate) fn unlog(&mut self, n: u64) {
        self.logged = self.logged.saturating_sub(n);
    }

    /// Move everything still queued into `wiped`. Returns how much that was.
    pub(crate) fn wipe_logged(&mut self) -> u64 {
        let lost = self.logged;
        self.wiped += lost;
        self.logged = 0;
        lost
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub events: Counters,
    pub bytes: Counters,
}

impl NodeStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.events.sent += 1;
        self.bytes.sent += bytes as u64;
    }

    pub(crate) fn record_logged(&mut self, bytes: usize) {
        self.events.log(1);
        self.bytes.log(bytes as u64);
    }

    pub(crate) fn record_unlogged(&mut self, bytes: usize) {
        self.events.unlog(1);
        self.bytes.unlog(bytes as u64);
    }

    pub(crate) fn record_dropped(&mut self, bytes: usize) {
        self.events.dropped += 1;
        self.bytes.dropped += bytes as u64;
    }

    /// Everything queued is gone. Returns the number of events lost.
    pub(crate) fn record_wiped(&mut self) -> u64 {
        self.bytes.wipe_logged();
        self.events.wipe_logged()
    }
}
