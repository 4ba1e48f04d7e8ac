//! Per-node connection state machine.
//!
//! A [`Node`] owns one link, one inbound [`EventBuffer`] and, once anything
//! had to be queued, one [`Backlog`]. Its state only moves along these
//! edges:
//!
//! ```text
//!            ┌──────────────── any ───────────────┐
//!            ▼                                    │
//!          NONE ──► PENDING ──► NEGOTIATING ──► CONNECTED
//!            │                      ▲
//!            └──────────────────────┘ (inbound accept)
//! ```
//!
//! Every I/O error, protocol violation or failed handshake takes the node
//! back to `NONE`. Writes are all-or-nothing: a packet that cannot be
//! written completely disconnects the node, since a partial packet would
//! desynchronize the peer's framing.

mod cipher;
mod handshake;
mod stats;

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

pub use cipher::PacketCipher;
pub use handshake::{check_compat, check_config, check_topology, ConfigDrift, TopologyMismatch};
pub use stats::{Counters, NodeStats};

use crate::backlog::Backlog;
use crate::error::{Incompatibility, Result, TransportError};
use crate::link::{write_ready, Link, NodeAddress};
use crate::protocol::{build_event, dest, Event, EventBuffer, NodeInfo, Timestamp};
use crate::registry::NodeId;

/// Attempts per packet before a slow peer is given up on.
const SEND_ATTEMPTS: usize = 15;

/// How long one attempt waits for the link to drain.
const SEND_ATTEMPT_WAIT: Duration = Duration::from_millis(100);

/// Largest single read from a link.
const READ_CHUNK: usize = 64 * 1024;

/// Counter lines are logged at most this often unless forced.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// What a node is to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Pushes configuration to us and receives our results.
    Master,
    /// Shares our workload.
    Peer,
    /// Runs checks on our behalf.
    Poller,
    /// The in-process loopback endpoint.
    Local,
}

impl NodeRole {
    /// Bit this role occupies in a magic destination.
    pub fn dest_flag(self) -> u16 {
        match self {
            NodeRole::Poller => dest::POLLERS & !dest::MAGIC,
            NodeRole::Peer => dest::PEERS & !dest::MAGIC,
            NodeRole::Master => dest::MASTERS & !dest::MAGIC,
            NodeRole::Local => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Peer => "peer",
            NodeRole::Poller => "poller",
            NodeRole::Local => "local",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// No link.
    None,
    /// Outbound connect in flight.
    Pending,
    /// Link established, waiting for the peer's `CTRL_ACTIVE`.
    Negotiating,
    /// Handshake accepted.
    Connected,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::None => "STATE_NONE",
            NodeState::Pending => "STATE_PENDING",
            NodeState::Negotiating => "STATE_NEGOTIATING",
            NodeState::Connected => "STATE_CONNECTED",
        }
    }

    fn can_become(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (_, None) | (None, Pending) | (None, Negotiating) | (Pending, _) | (Negotiating, Connected)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called as `(node, from, to)` whenever a node enters or leaves
/// [`NodeState::Connected`].
pub type StateCallback = Box<dyn FnMut(NodeId, NodeState, NodeState) + Send + Sync>;

struct PendingConnect {
    handle: JoinHandle<io::Result<Box<dyn Link>>>,
    started: Instant,
}

/// One remote (or loopback) node.
pub struct Node {
    pub(crate) id: NodeId,
    name: String,
    role: NodeRole,
    address: Option<NodeAddress>,
    initiate: bool,

    state: NodeState,
    link: Option<Box<dyn Link>>,
    pending: Option<PendingConnect>,
    input: EventBuffer,
    scratch: Vec<u8>,
    pub(crate) backlog: Option<Backlog>,

    info: Option<NodeInfo>,
    incompatible: Option<Incompatibility>,
    pub(crate) stats: NodeStats,
    pub(crate) out_of_sync: bool,

    on_state_change: Option<StateCallback>,
    cipher: Option<Box<dyn PacketCipher>>,

    last_recv: Option<Instant>,
    last_sent: Option<Instant>,
    last_conn_attempt: Option<Instant>,
    connected_at: Option<Instant>,
    connect_time: Option<Timestamp>,
    last_stats_log: Option<Instant>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node in state `NONE`. Nodes get their id when added to a
    /// [`Registry`](crate::Registry).
    pub fn new(name: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id: NodeId::UNASSIGNED,
            name: name.into(),
            role,
            address: None,
            initiate: true,
            state: NodeState::None,
            link: None,
            pending: None,
            input: EventBuffer::default(),
            scratch: Vec::new(),
            backlog: None,
            info: None,
            incompatible: None,
            stats: NodeStats::default(),
            out_of_sync: false,
            on_state_change: None,
            cipher: None,
            last_recv: None,
            last_sent: None,
            last_conn_attempt: None,
            connected_at: None,
            connect_time: None,
            last_stats_log: None,
        }
    }

    pub fn with_address(mut self, address: NodeAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Never connect out; wait for the node to connect to us.
    pub fn accept_only(mut self) -> Self {
        self.initiate = false;
        self
    }

    pub fn with_cipher(mut self, cipher: Box<dyn PacketCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_read_buffer_limit(mut self, limit: usize) -> Self {
        self.input = EventBuffer::with_limit(limit);
        self
    }

    /// Register the connected/disconnected callback.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(NodeId, NodeState, NodeState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn address(&self) -> Option<&NodeAddress> {
        self.address.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NodeState::Connected
    }

    /// Node info the peer sent in its last accepted `CTRL_ACTIVE`.
    pub fn info(&self) -> Option<&NodeInfo> {
        self.info.as_ref()
    }

    /// Why the last handshake was refused, until one succeeds.
    pub fn incompatibility(&self) -> Option<&Incompatibility> {
        self.incompatible.as_ref()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn backlog(&self) -> Option<&Backlog> {
        self.backlog.as_ref()
    }

    /// Entries waiting in the backlog.
    pub fn queued(&self) -> u64 {
        self.backlog.as_ref().map_or(0, Backlog::num_entries)
    }

    /// Set when events were lost in a way the peer cannot detect.
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn last_recv(&self) -> Option<Instant> {
        self.last_recv
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Wall-clock time the node last reached `CONNECTED`.
    pub fn connect_time(&self) -> Option<Timestamp> {
        self.connect_time
    }

    /// Move to `to`. Returns `true` if the state changed.
    ///
    /// Transitions outside the allowed edges are logged and turned into a
    /// disconnect.
    pub fn set_state(&mut self, to: NodeState, reason: &str) -> bool {
        let from = self.state;
        if from == to {
            return false;
        }
        if !from.can_become(to) {
            tracing::error!(
                "Illegal state transition for {}: {} -> {} ({})",
                self.name,
                from,
                to,
                reason
            );
            self.disconnect("illegal state transition");
            return from != self.state;
        }

        self.state = to;
        match to {
            NodeState::Connected => {
                tracing::info!("{} {} connected: {}", self.role, self.name, reason);
                self.connected_at = Some(Instant::now());
                self.connect_time = Some(Timestamp::now());
            }
            _ => tracing::debug!("{}: {} -> {}: {}", self.name, from, to, reason),
        }

        if from == NodeState::Connected || to == NodeState::Connected {
            let id = self.id;
            if let Some(callback) = self.on_state_change.as_mut() {
                callback(id, from, to);
            }
        }
        true
    }

    /// Drop the link and return to `NONE`. Queued events stay queued.
    pub fn disconnect(&mut self, reason: &str) {
        if self.state == NodeState::None && self.link.is_none() && self.pending.is_none() {
            return;
        }
        tracing::info!("Disconnecting {} {}: {}", self.role, self.name, reason);
        self.log_event_count(true);

        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
        self.link = None;
        self.info = None;
        self.input.clear();
        self.connected_at = None;
        self.set_state(NodeState::None, reason);
    }

    /// Take over an established link and start negotiating.
    pub(crate) fn attach(&mut self, link: Box<dyn Link>) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
        tracing::debug!("{}: link established with {}", self.name, link.peer());
        self.link = Some(link);
        self.input.clear();
        self.last_recv = Some(Instant::now());
        self.set_state(NodeState::Negotiating, "link established");
    }

    /// Begin an outbound connect if this node initiates, is idle, and the
    /// last attempt is at least `interval` ago. Must run inside a runtime.
    pub(crate) fn start_connect(&mut self, now: Instant, interval: Duration) -> bool {
        if !self.initiate || self.state != NodeState::None {
            return false;
        }
        let Some(address) = self.address.clone() else {
            return false;
        };
        if let Some(last) = self.last_conn_attempt {
            if now.saturating_duration_since(last) < interval {
                return false;
            }
        }

        tracing::debug!("Connecting to {} {} at {}", self.role, self.name, address);
        self.last_conn_attempt = Some(now);
        self.pending = Some(PendingConnect {
            handle: tokio::spawn(async move { address.connect().await }),
            started: now,
        });
        self.set_state(NodeState::Pending, "connect in progress")
    }

    /// Collect the result of an outbound connect. Returns the link once
    /// the connect succeeded; failures and timeouts disconnect.
    pub(crate) async fn poll_connect(&mut self, timeout: Duration) -> Option<Box<dyn Link>> {
        let pending = self.pending.as_ref()?;
        if !pending.handle.is_finished() {
            if pending.started.elapsed() > timeout {
                self.disconnect(&format!(
                    "connect() timed out after {} seconds",
                    timeout.as_secs()
                ));
            }
            return None;
        }

        let pending = self.pending.take()?;
        match pending.handle.await {
            Ok(Ok(link)) => Some(link),
            Ok(Err(e)) => {
                self.disconnect(&format!("connect() failed: {}", e));
                None
            }
            Err(e) => {
                self.disconnect(&format!("connect task failed: {}", e));
                None
            }
        }
    }

    /// Wait at most `wait` for the link to accept more bytes.
    pub async fn write_ready(&self, wait: Duration) -> bool {
        match self.link.as_deref() {
            Some(link) => write_ready(link, wait).await,
            None => false,
        }
    }

    /// Write one complete packet. Counters are left to the caller.
    ///
    /// While the link is full this waits up to `SEND_ATTEMPTS` times
    /// `SEND_ATTEMPT_WAIT` (1.5 s) for room, so one call can suspend the
    /// caller that long. Anything short of a complete write disconnects
    /// the node.
    pub async fn send(&mut self, packet: &[u8]) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let mut written = 0;
        let mut failure = None;
        for _ in 0..SEND_ATTEMPTS {
            match link.try_write(&packet[written..]) {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => {
                    written += n;
                    if written == packet.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            write_ready(link.as_ref(), SEND_ATTEMPT_WAIT).await;
        }

        if written == packet.len() {
            self.last_sent = Some(Instant::now());
            return Ok(());
        }

        let err = failure.unwrap_or_else(|| io::Error::from(io::ErrorKind::TimedOut));
        self.disconnect(&format!(
            "send() wrote {} of {} bytes: {}",
            written,
            packet.len(),
            err
        ));
        Err(TransportError::Io(err))
    }

    /// Encode, seal and send one event. Counts the event as sent.
    pub async fn send_event(&mut self, event: &Event) -> Result<()> {
        let packet = match self.seal(event) {
            Ok(packet) => packet,
            Err(e) => {
                self.disconnect("failed to encrypt packet");
                return Err(e);
            }
        };
        self.send(&packet).await?;
        self.stats.record_sent(packet.len());
        Ok(())
    }

    fn seal(&self, event: &Event) -> Result<Vec<u8>> {
        let Some(cipher) = self.cipher.as_ref() else {
            return Ok(event.encode());
        };
        let mut header = event.header;
        let mut body = event.body.to_vec();
        cipher.seal(&mut header, &mut body)?;
        Ok(build_event(&header, &body))
    }

    /// Pull everything the link has ready into the input buffer.
    ///
    /// Returns the number of bytes read, which is 0 if nothing was
    /// available. A hang-up or read error disconnects the node, unless
    /// bytes arrived ahead of it in the same call.
    pub fn recv(&mut self) -> Result<usize> {
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if self.scratch.is_empty() {
            self.scratch = vec![0u8; READ_CHUNK];
        }

        let mut total = 0;
        loop {
            let want = self.input.spare().min(READ_CHUNK);
            if want == 0 {
                break;
            }
            match link.try_read(&mut self.scratch[..want]) {
                // data read before a hangup is framed first; the next
                // call sees the hangup again
                Ok(0) if total > 0 => break,
                Ok(0) => {
                    self.disconnect("recv() returned zero");
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(n) => {
                    self.input.extend(&self.scratch[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.disconnect(&format!("recv() failed: {}", e));
                    return Err(TransportError::Io(e));
                }
            }
        }

        if total > 0 {
            self.stats.bytes.read += total as u64;
            self.last_recv = Some(Instant::now());
        }
        Ok(total)
    }

    /// Take the next complete event out of the input buffer.
    ///
    /// `Ok(None)` means the next packet has not fully arrived. A framing
    /// error or failed decryption disconnects the node.
    pub fn get_event(&mut self) -> Result<Option<Event>> {
        let event = match self.input.get_event() {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.disconnect(&format!("invalid packet: {}", e));
                return Err(e.into());
            }
        };
        self.stats.events.read += 1;

        let Some(cipher) = self.cipher.as_ref() else {
            return Ok(Some(event));
        };
        let mut header = event.header;
        let mut body = event.body.to_vec();
        if let Err(e) = cipher.open(&mut header, &mut body) {
            self.disconnect("failed to decrypt packet");
            return Err(e.into());
        }
        header.len = body.len() as u32;
        Ok(Some(Event::from_parts(header, body.into())))
    }

    /// Iterate over the events currently buffered. Ends at the first
    /// incomplete packet or error.
    pub fn events(&mut self) -> NodeEvents<'_> {
        NodeEvents { node: self }
    }

    /// Process a received `CTRL_ACTIVE`.
    ///
    /// Hard incompatibilities disconnect the node and are remembered.
    /// Soft mismatches against `ours` are logged. A negotiating node
    /// becomes connected.
    pub fn handle_ctrl_active(
        &mut self,
        event: &Event,
        ours: &NodeInfo,
    ) -> std::result::Result<(), Incompatibility> {
        let theirs = match check_compat(event, ours) {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(
                    "{} {} is incompatible with us: {}",
                    self.role,
                    self.name,
                    e
                );
                self.incompatible = Some(e.clone());
                self.disconnect("incompatible protocol");
                return Err(e);
            }
        };

        if let Err(mismatch) = check_topology(self.role, &theirs, ours) {
            tracing::warn!(
                "{} {} disagrees on topology ({})",
                self.role,
                self.name,
                mismatch
            );
        }
        match check_config(self.role, &theirs, ours) {
            ConfigDrift::Same => {}
            ConfigDrift::TheirsNewer => tracing::warn!(
                "{} {} has a newer configuration than ours",
                self.role,
                self.name
            ),
            ConfigDrift::OursNewer => tracing::warn!(
                "{} {} has an older configuration than ours",
                self.role,
                self.name
            ),
        }

        self.incompatible = None;
        self.info = Some(theirs);
        if self.state == NodeState::Negotiating {
            self.set_state(NodeState::Connected, "CTRL_ACTIVE accepted");
        }
        Ok(())
    }

    /// Disconnect a connected node that has been silent for too long.
    pub fn check_activity(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.state != NodeState::Connected || timeout.is_zero() {
            return false;
        }
        let last = match (self.last_recv, self.connected_at) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => match a.or(b) {
                Some(t) => t,
                None => return false,
            },
        };
        if now.saturating_duration_since(last) <= timeout {
            return false;
        }
        self.disconnect(&format!(
            "too long since last action ({} seconds)",
            now.saturating_duration_since(last).as_secs()
        ));
        true
    }

    /// Log the counters, at most once a minute unless forced.
    pub fn log_event_count(&mut self, force: bool) {
        let now = Instant::now();
        if !force {
            if let Some(last) = self.last_stats_log {
                if now.saturating_duration_since(last) < STATS_LOG_INTERVAL {
                    return;
                }
            }
        }
        self.last_stats_log = Some(now);

        let events = &self.stats.events;
        if events.sent + events.read + events.logged + events.dropped + events.wiped == 0 {
            return;
        }
        tracing::info!(
            "{} {}: events sent={} read={} logged={} dropped={} wiped={}; bytes sent={} read={}",
            self.role,
            self.name,
            events.sent,
            events.read,
            events.logged,
            events.dropped,
            events.wiped,
            self.stats.bytes.sent,
            self.stats.bytes.read
        );
    }
}

/// Lazy iterator over a node's buffered events.
pub struct NodeEvents<'a> {
    node: &'a mut Node,
}

impl Iterator for NodeEvents<'_> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.node.get_event().transpose()
    }
}
