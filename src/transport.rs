//! Ordered, at-least-queued event delivery.
//!
//! [`EventTransport`] owns the node [`Registry`] and makes one promise per
//! node: an event handed to [`send_event`](EventTransport::send_event) is
//! either written to the peer in full or appended to the node's backlog,
//! and the backlog is always emptied, oldest first, before anything new is
//! written live.
//!
//! # Example
//!
//! ```ignore
//! use nodelink::{Event, EventTransport, Node, NodeRole, TransportConfig};
//!
//! let mut transport = EventTransport::new(TransportConfig::default(), local_info, uuid)?;
//! let peer = transport.add_node(Node::new("peer-a", NodeRole::Peer).with_address(addr));
//!
//! transport.send_event(peer, &Event::new(7, 0, body), None).await?;
//! let (stop, shutdown) = tokio::sync::oneshot::channel();
//! let (sink, mut inbound) = tokio::sync::mpsc::channel(1024);
//! transport.run(shutdown, sink).await?;
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::backlog::Backlog;
use crate::config::TransportConfig;
use crate::error::{BacklogError, ProtocolError, Result, TransportError};
use crate::link::Link;
use crate::node::{Node, NodeRole, NodeState};
use crate::protocol::{ctrl, dest, Event, NodeInfo, MAX_BODY_SIZE, MAX_PKT_SIZE};
use crate::registry::{NoRoutes, NodeId, Registry, Router};

/// What happened to one event handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the peer in full.
    Sent,
    /// Appended to the node's backlog.
    Queued,
    /// Lost; the node's `dropped` counter was incremented.
    Dropped,
    /// A handshake event for a node that could not take it right now.
    Skipped,
}

/// Result of one backlog drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued.
    Empty,
    /// The backlog is empty now.
    Drained { sent: u64 },
    /// The link filled up or failed before the backlog was empty.
    Stalled { sent: u64, remaining: u64 },
    /// A corrupt record was found and the whole backlog discarded.
    Wiped { lost: u64 },
}

pub struct EventTransport {
    config: TransportConfig,
    registry: Registry,
    router: Box<dyn Router>,
    local: NodeInfo,
    uuid: String,
}

impl EventTransport {
    /// Create a transport for a process described by `local`, identified
    /// on the wire by `uuid`.
    pub fn new(config: TransportConfig, local: NodeInfo, uuid: impl Into<String>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Registry::new(),
            router: Box::new(NoRoutes),
            local,
            uuid: uuid.into(),
        })
    }

    pub fn with_router(mut self, router: impl Router + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let node = node.with_read_buffer_limit(self.config.read_buffer_limit);
        self.registry.add(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.registry.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.registry.get_mut(id)
    }

    fn node_entry(&mut self, id: NodeId) -> Result<&mut Node> {
        self.registry
            .get_mut(id)
            .ok_or(TransportError::UnknownNode(id))
    }

    /// Our node info with current node counts filled in.
    pub fn local_info(&self) -> NodeInfo {
        let mut info = self.local;
        info.active_peers = self.registry.active_count(NodeRole::Peer);
        info.active_pollers = self.registry.active_count(NodeRole::Poller);
        info.active_masters = self.registry.active_count(NodeRole::Master);
        info.configured_peers = self.registry.configured_count(NodeRole::Peer);
        info.configured_pollers = self.registry.configured_count(NodeRole::Poller);
        info.configured_masters = self.registry.configured_count(NodeRole::Master);
        info
    }

    /// Deliver `event` to one node, or queue it.
    ///
    /// With a `timeout`, a link that is not writable within that time gets
    /// the event queued instead. Queued events always go out before this
    /// one.
    ///
    /// # Errors
    ///
    /// `UnknownNode`, or `Protocol` if the event is larger than a packet
    /// may be. Delivery failures are reported through [`Delivery`].
    pub async fn send_event(
        &mut self,
        id: NodeId,
        event: &Event,
        timeout: Option<Duration>,
    ) -> Result<Delivery> {
        let mut event = event.clone();
        event.stamp(&self.uuid);
        if event.packet_size() > MAX_PKT_SIZE {
            return Err(ProtocolError::Oversize {
                len: event.body.len(),
                max: MAX_BODY_SIZE,
            }
            .into());
        }

        let config = &self.config;
        let node = self
            .registry
            .get_mut(id)
            .ok_or(TransportError::UnknownNode(id))?;

        if !node.is_connected() {
            return Ok(enqueue(config, node, &event));
        }
        if let Some(timeout) = timeout {
            if !node.write_ready(timeout).await {
                return Ok(enqueue(config, node, &event));
            }
        }
        if node.queued() > 0 {
            drain(config, node).await;
            if node.queued() > 0 || !node.is_connected() {
                return Ok(enqueue(config, node, &event));
            }
        }

        match node.send_event(&event).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(e) => {
                tracing::debug!("Live send to {} failed: {}", node.name(), e);
                Ok(enqueue(config, node, &event))
            }
        }
    }

    /// Send `event` to every node its selection resolves to, waiting at
    /// most `send_timeout` per node.
    pub async fn route(&mut self, event: &Event) -> Vec<(NodeId, Result<Delivery>)> {
        let targets = self
            .registry
            .resolve(event.header.selection, self.router.as_ref());
        let timeout = Some(self.config.send_timeout);

        let mut results = Vec::with_capacity(targets.len());
        for id in targets {
            let result = self.send_event(id, event, timeout).await;
            results.push((id, result));
        }
        results
    }

    /// Send as much of a node's backlog as the link takes right now.
    pub async fn drain(&mut self, id: NodeId) -> Result<DrainOutcome> {
        let config = &self.config;
        let node = self
            .registry
            .get_mut(id)
            .ok_or(TransportError::UnknownNode(id))?;
        Ok(drain(config, node).await)
    }

    /// Read what a node has sent and return its events.
    ///
    /// Handshake and keepalive control events are handled here and not
    /// returned. Data events from a node that is not connected are
    /// discarded.
    ///
    /// A framing or handshake error disconnects the node. Events framed
    /// before the bad packet are still returned; the error is only
    /// reported when there is nothing to hand back.
    pub fn receive(&mut self, id: NodeId) -> Result<Vec<Event>> {
        let local = self.local_info();
        let node = self.node_entry(id)?;
        if !node.has_link() {
            return Err(TransportError::NotConnected);
        }
        node.recv()?;

        let mut events = Vec::new();
        let mut failure = None;
        loop {
            let event = match node.get_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if event.is_ctrl() {
                match event.header.code {
                    ctrl::ACTIVE => {
                        if let Err(e) = node.handle_ctrl_active(&event, &local) {
                            failure = Some(TransportError::from(e));
                            break;
                        }
                        continue;
                    }
                    ctrl::INACTIVE => {
                        node.disconnect("received CTRL_INACTIVE");
                        break;
                    }
                    ctrl::PULSE => continue,
                    _ => {}
                }
            } else if !node.is_connected() {
                tracing::warn!(
                    "Discarding event of type {} from {}, which is in {}",
                    event.header.kind,
                    node.name(),
                    node.state()
                );
                continue;
            }
            events.push(event);
        }

        match failure {
            Some(e) if events.is_empty() => Err(e),
            Some(e) => {
                tracing::warn!(
                    "Delivering {} events from {} read before: {}",
                    events.len(),
                    node.name(),
                    e
                );
                Ok(events)
            }
            None => Ok(events),
        }
    }

    /// Announce ourselves to a node with a `CTRL_ACTIVE`.
    pub async fn send_handshake(&mut self, id: NodeId) -> Result<()> {
        let body = self.local_info().encode();
        let mut event = Event::ctrl(ctrl::ACTIVE, dest::BROADCAST, body.to_vec());
        event.stamp(&self.uuid);
        self.node_entry(id)?.send_event(&event).await
    }

    /// Hand an inbound link to a node and start the handshake.
    ///
    /// Returns `false` if the link was refused because the node already
    /// has one past the connect stage. A pending outbound connect is
    /// abandoned in favour of the inbound link.
    pub async fn accept(&mut self, id: NodeId, link: Box<dyn Link>) -> Result<bool> {
        let node = self.node_entry(id)?;
        match node.state() {
            NodeState::Connected | NodeState::Negotiating => {
                tracing::info!(
                    "Refusing inbound connection from {} for {}, which is in {}",
                    link.peer(),
                    node.name(),
                    node.state()
                );
                return Ok(false);
            }
            NodeState::Pending => {
                tracing::debug!("{}: inbound connection replaces pending connect", node.name());
            }
            NodeState::None => {}
        }

        node.attach(link);
        self.send_handshake(id).await?;
        Ok(true)
    }

    /// One pass of the event loop over every node.
    ///
    /// Per node: finish or start outbound connects, enforce the data
    /// timeout, keep the link alive, drain the backlog, and read. Errors
    /// are logged and leave the node for the next pass.
    pub async fn poll_once(&mut self) -> Vec<(NodeId, Event)> {
        let now = Instant::now();
        let ids: Vec<NodeId> = self.registry.ids().collect();
        let mut inbound = Vec::new();

        for id in ids {
            self.poll_connect(id, now).await;

            let config = &self.config;
            let Some(node) = self.registry.get_mut(id) else {
                continue;
            };
            node.check_activity(now, config.data_timeout);
            if node.is_connected() {
                drain(config, node).await;
            }
            self.send_pulse(id, now).await;

            if self.registry.get(id).is_some_and(Node::has_link) {
                match self.receive(id) {
                    Ok(events) => inbound.extend(events.into_iter().map(|e| (id, e))),
                    Err(e) => tracing::debug!("Receive from node {} failed: {}", id, e),
                }
            }

            if let Some(node) = self.registry.get_mut(id) {
                node.log_event_count(false);
            }
        }
        inbound
    }

    async fn poll_connect(&mut self, id: NodeId, now: Instant) {
        let (timeout, interval) = (self.config.connect_timeout, self.config.connect_interval);
        let Some(node) = self.registry.get_mut(id) else {
            return;
        };

        match node.state() {
            NodeState::Pending => {
                let Some(link) = node.poll_connect(timeout).await else {
                    return;
                };
                node.attach(link);
                if let Err(e) = self.send_handshake(id).await {
                    tracing::warn!("Failed to send CTRL_ACTIVE to node {}: {}", id, e);
                }
            }
            NodeState::None => {
                node.start_connect(now, interval);
            }
            _ => {}
        }
    }

    /// Keep a quiet link from hitting the peer's data timeout.
    async fn send_pulse(&mut self, id: NodeId, now: Instant) {
        let every = self.config.data_timeout / 2;
        let Some(node) = self.registry.get(id) else {
            return;
        };
        if !node.is_connected() || every.is_zero() {
            return;
        }
        if node
            .last_sent()
            .is_some_and(|t| now.saturating_duration_since(t) < every)
        {
            return;
        }

        let mut event = Event::ctrl(ctrl::PULSE, dest::BROADCAST, Vec::new());
        event.stamp(&self.uuid);
        if let Some(node) = self.registry.get_mut(id) {
            if let Err(e) = node.send_event(&event).await {
                tracing::debug!("CTRL_PULSE to {} failed: {}", node.name(), e);
            }
        }
    }

    /// Run the event loop until `shutdown` fires (or its sender is
    /// dropped), forwarding inbound events to `sink`.
    pub async fn run(
        &mut self,
        mut shutdown: oneshot::Receiver<()>,
        sink: mpsc::Sender<(NodeId, Event)>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    for item in self.poll_once().await {
                        if sink.send(item).await.is_err() {
                            tracing::info!("Event sink closed, stopping transport");
                            self.disconnect_all("event sink closed");
                            return Ok(());
                        }
                    }
                }
            }
        }

        self.disconnect_all("shutting down");
        Ok(())
    }

    pub fn disconnect(&mut self, id: NodeId, reason: &str) -> Result<()> {
        self.node_entry(id)?.disconnect(reason);
        Ok(())
    }

    pub fn disconnect_all(&mut self, reason: &str) {
        for node in self.registry.iter_mut() {
            node.disconnect(reason);
        }
    }

    /// Persist every node's backlog so a restarted process can pick it up
    /// with [`restore_backlogs`](Self::restore_backlogs). Returns the saved
    /// data files.
    pub fn save_backlogs(&mut self) -> Vec<PathBuf> {
        let mut saved = Vec::new();
        for node in self.registry.iter_mut() {
            let Some(backlog) = node.backlog.as_mut() else {
                continue;
            };
            let entries = backlog.num_entries();
            match backlog.save() {
                Ok(Some(path)) => {
                    tracing::info!(
                        "Saved {} queued events for {} to {}",
                        entries,
                        node.name(),
                        path.display()
                    );
                    node.stats.events.logged = 0;
                    node.stats.bytes.logged = 0;
                    saved.push(path);
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to save backlog for {}: {}", node.name(), e),
            }
        }
        saved
    }

    /// Load backlogs saved by a previous process. Nodes that already have
    /// queued events are left alone. Returns the number of events restored.
    pub fn restore_backlogs(&mut self) -> u64 {
        let mut restored = 0;
        for node in self.registry.iter_mut() {
            if node.queued() > 0 {
                tracing::warn!(
                    "Not restoring saved backlog for {}: events already queued",
                    node.name()
                );
                continue;
            }
            let path = self.config.backlog_path(node.name());
            match Backlog::restore(path) {
                Ok(Some(backlog)) => {
                    let entries = backlog.num_entries();
                    tracing::info!("Restored {} queued events for {}", entries, node.name());
                    node.stats.events.logged = entries;
                    node.stats.bytes.logged = backlog.available_bytes();
                    node.backlog = Some(backlog);
                    restored += entries;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(
                    "Discarding unusable saved backlog for {}: {}",
                    node.name(),
                    e
                ),
            }
        }
        restored
    }
}

/// Append a stamped event to a node's backlog, creating the backlog on
/// first use.
fn enqueue(config: &TransportConfig, node: &mut Node, event: &Event) -> Delivery {
    if event.is_handshake() {
        return Delivery::Skipped;
    }
    let packet = event.encode();

    if node.backlog.is_none() {
        match Backlog::create(
            Some(config.backlog_path(node.name())),
            config.backlog_max_memory,
            config.backlog_max_file,
            true,
        ) {
            Ok(backlog) => node.backlog = Some(backlog),
            Err(e) => {
                tracing::error!("Failed to create backlog for {}: {}", node.name(), e);
                node.stats.record_dropped(packet.len());
                return Delivery::Dropped;
            }
        }
    }

    let result = match node.backlog.as_mut() {
        Some(backlog) => backlog.add(&packet),
        None => return Delivery::Dropped,
    };
    match result {
        Ok(()) => {
            node.stats.record_logged(packet.len());
            Delivery::Queued
        }
        Err(BacklogError::NoSpace { needed, limit }) => {
            if node
                .backlog
                .as_mut()
                .is_some_and(Backlog::should_warn_if_full)
            {
                tracing::warn!(
                    "Backlog for {} is full ({} bytes needed, limit {}); dropping events",
                    node.name(),
                    needed,
                    limit
                );
            }
            node.stats.record_dropped(packet.len());
            Delivery::Dropped
        }
        Err(BacklogError::Io(e)) => {
            // nothing was written, so what is already queued stays intact
            tracing::error!("Failed to queue event for {}: {}", node.name(), e);
            node.stats.record_dropped(packet.len());
            Delivery::Dropped
        }
        Err(e) => {
            tracing::error!("Failed to queue event for {}: {}", node.name(), e);
            wipe_backlog(node, &e.to_string());
            node.stats.record_dropped(packet.len());
            Delivery::Dropped
        }
    }
}

/// Pop and send queued events until the backlog is empty or the link
/// stops taking them.
async fn drain(config: &TransportConfig, node: &mut Node) -> DrainOutcome {
    if node.queued() == 0 {
        return DrainOutcome::Empty;
    }

    let mut sent = 0;
    while node.is_connected() {
        if !node.write_ready(config.drain_wait).await {
            break;
        }
        let next = match node.backlog.as_mut() {
            Some(backlog) => backlog.read(),
            None => break,
        };
        let packet = match next {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => return wipe_backlog(node, &e.to_string()),
        };
        let event = match Event::from_packet(packet.clone()) {
            Ok(event) if packet.len() <= MAX_PKT_SIZE => event,
            Ok(_) => return wipe_backlog(node, "queued packet exceeds maximum size"),
            Err(e) => return wipe_backlog(node, &e.to_string()),
        };

        if node.send_event(&event).await.is_ok() {
            node.stats.record_unlogged(packet.len());
            sent += 1;
            continue;
        }

        let restored = match node.backlog.as_mut() {
            Some(backlog) => backlog.unread(&packet),
            None => Err(BacklogError::Dropped),
        };
        if let Err(e) = restored {
            tracing::warn!(
                "Could not requeue event for {} ({}); peer is out of sync",
                node.name(),
                e
            );
            node.stats.record_unlogged(packet.len());
            node.stats.record_dropped(packet.len());
            node.out_of_sync = true;
        }
        break;
    }

    match node.queued() {
        0 if sent == 0 => DrainOutcome::Empty,
        0 => DrainOutcome::Drained { sent },
        remaining => DrainOutcome::Stalled { sent, remaining },
    }
}

fn wipe_backlog(node: &mut Node, reason: &str) -> DrainOutcome {
    if let Some(backlog) = node.backlog.as_mut() {
        backlog.wipe(true);
    }
    let lost = node.stats.record_wiped();
    node.out_of_sync = true;
    tracing::error!(
        "Backlog for {} is corrupt ({}); discarded {} queued events",
        node.name(),
        reason,
        lost
    );
    DrainOutcome::Wiped { lost }
}
