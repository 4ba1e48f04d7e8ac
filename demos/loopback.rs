//! Loopback - two transports exchanging events in one process.
//!
//! This demo shows:
//! - Queueing an event for a node that is not reachable yet
//! - Connecting two transports over an in-process link
//! - The `CTRL_ACTIVE` handshake and backlog drain driven by `poll_once`
//! - A live event sent once both sides are connected
//!
//! ```text
//! cargo run --example loopback
//! ```

use nodelink::link::MemoryLink;
use nodelink::protocol::{NodeInfo, Timestamp};
use nodelink::{Event, EventTransport, Node, NodeRole, TransportConfig};

fn transport(name: &str) -> Result<EventTransport, Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join(format!("nodelink-loopback-{}", name));
    std::fs::create_dir_all(&dir)?;
    let config = TransportConfig::default().with_backlog_dir(&dir);
    Ok(EventTransport::new(
        config,
        NodeInfo::local(Timestamp::now()),
        name,
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut a = transport("alpha")?;
    let mut b = transport("beta")?;
    let beta = a.add_node(Node::new("beta", NodeRole::Peer).accept_only());
    let alpha = b.add_node(Node::new("alpha", NodeRole::Peer).accept_only());

    // nothing is connected yet, so this one waits in alpha's backlog
    let delivery = a
        .send_event(beta, &Event::new(1, 0, &b"queued while offline"[..]), None)
        .await?;
    println!("alpha -> beta: {:?}", delivery);

    let (ours, theirs) = MemoryLink::pair(1 << 16);
    a.accept(beta, Box::new(ours)).await?;
    b.accept(alpha, Box::new(theirs)).await?;

    let mut received = Vec::new();
    for _ in 0..10 {
        a.poll_once().await;
        received.extend(b.poll_once().await);
        if !received.is_empty() {
            break;
        }
    }
    println!(
        "alpha sees beta as {}, beta sees alpha as {}",
        a.node(beta).map(|n| n.state().to_string()).unwrap_or_default(),
        b.node(alpha).map(|n| n.state().to_string()).unwrap_or_default()
    );

    let delivery = a
        .send_event(beta, &Event::new(1, 0, &b"sent live"[..]), None)
        .await?;
    println!("alpha -> beta: {:?}", delivery);
    received.extend(b.poll_once().await);

    for (_, event) in &received {
        println!(
            "beta received type {} from {}: {}",
            event.header.kind,
            event.header.sender(),
            String::from_utf8_lossy(event.body())
        );
    }

    if let Some(node) = a.node(beta) {
        let stats = node.stats();
        println!(
            "alpha -> beta: {} events sent, {} logged, {} dropped",
            stats.events.sent, stats.events.logged, stats.events.dropped
        );
    }

    a.disconnect_all("demo finished");
    b.disconnect_all("demo finished");
    Ok(())
}
