//! # nodelink
//!
//! Ordered, durable event transport between cooperating monitoring daemons.
//!
//! Every daemon talks to its masters, peers and pollers over one link per
//! node. Events that cannot be delivered right away are kept in a per-node
//! backlog that spills from memory to disk, and are sent in order before
//! anything new once the node is reachable again.
//!
//! ## Architecture
//!
//! - **Protocol**: fixed 128-byte header, opaque body, `CTRL_ACTIVE`
//!   handshake carrying a [`NodeInfo`](protocol::NodeInfo) record
//! - **Backlog**: two-tier FIFO (memory, then an append-only file)
//! - **Node**: connection state machine `NONE → PENDING → NEGOTIATING →
//!   CONNECTED`
//! - **Transport**: routing, send-or-queue, draining and the event loop
//!
//! ## Example
//!
//! ```ignore
//! use nodelink::link::NodeAddress;
//! use nodelink::protocol::{NodeInfo, Timestamp};
//! use nodelink::{Event, EventTransport, Node, NodeRole, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> nodelink::Result<()> {
//!     let config = TransportConfig::from_json(r#"{"backlog_dir": "/var/lib/nodelink"}"#)?;
//!     let mut transport =
//!         EventTransport::new(config, NodeInfo::local(Timestamp::now()), "3f0c...")?;
//!
//!     let peer = transport.add_node(
//!         Node::new("peer-a", NodeRole::Peer)
//!             .with_address(NodeAddress::Tcp("10.0.0.2:15551".parse().unwrap())),
//!     );
//!     transport.send_event(peer, &Event::new(7, 0, &b"payload"[..]), None).await?;
//!
//!     let (_stop, shutdown) = tokio::sync::oneshot::channel();
//!     let (sink, _inbound) = tokio::sync::mpsc::channel(1024);
//!     transport.run(shutdown, sink).await
//! }
//! ```

pub mod backlog;
pub mod config;
pub mod error;
pub mod link;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use backlog::Backlog;
pub use config::TransportConfig;
pub use error::{
    BacklogError, CipherError, Incompatibility, ProtocolError, Result, TransportError,
};
pub use node::{Node, NodeRole, NodeState, NodeStats, PacketCipher};
pub use protocol::Event;
pub use registry::{NodeId, Registry, Router, StaticRouter};
pub use transport::{Delivery, DrainOutcome, EventTransport};
