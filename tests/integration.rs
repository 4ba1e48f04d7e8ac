//! Integration tests for nodelink.
//!
//! These drive the public API end to end: in-process links for the
//! transport scenarios, real TCP for the connect path, and temporary
//! directories for everything that touches the backlog on disk.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use nodelink::link::{Link, Listener, MemoryLink, NodeAddress};
use nodelink::protocol::{ctrl, dest, EventBuffer, NodeInfo, Timestamp, HEADER_SIZE};
use nodelink::{
    Backlog, Delivery, DrainOutcome, Event, EventTransport, Incompatibility, Node, NodeId,
    NodeRole, NodeState, TransportConfig, TransportError,
};

fn transport(dir: &Path, max_memory: u64) -> EventTransport {
    let config = TransportConfig::default()
        .with_backlog_dir(dir)
        .with_backlog_limits(max_memory, 1 << 24);
    EventTransport::new(config, NodeInfo::local(Timestamp::now()), "integration").unwrap()
}

/// Read everything waiting on `link` and frame it.
fn read_events(link: &mut MemoryLink) -> Vec<Event> {
    let mut buffer = EventBuffer::default();
    let mut chunk = [0u8; 8192];
    while let Ok(n) = link.try_read(&mut chunk) {
        if n == 0 {
            break;
        }
        buffer.extend(&chunk[..n]);
    }
    buffer.events().map(|e| e.unwrap()).collect()
}

/// Connect `id` over a fresh in-process link and complete the handshake
/// from the remote side.
async fn handshake(t: &mut EventTransport, id: NodeId, capacity: usize) -> MemoryLink {
    let (ours, mut remote) = MemoryLink::pair(capacity);
    assert!(t.accept(id, Box::new(ours)).await.unwrap());

    let hello = read_events(&mut remote);
    assert_eq!(hello.len(), 1);
    assert!(hello[0].is_ctrl_code(ctrl::ACTIVE));

    let reply = Event::ctrl(ctrl::ACTIVE, dest::BROADCAST, hello[0].body.clone());
    remote.try_write(&reply.encode()).unwrap();
    assert!(t.receive(id).unwrap().is_empty());
    assert!(t.node(id).unwrap().is_connected());
    remote
}

fn bodies(events: &[Event]) -> Vec<Vec<u8>> {
    events.iter().map(|e| e.body().to_vec()).collect()
}

#[tokio::test]
async fn test_fifo_across_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));

    let mut remote = handshake(&mut t, id, 1 << 20).await;
    for i in 0..3u8 {
        let delivery = t.send_event(id, &Event::new(1, 0, vec![i]), None).await.unwrap();
        assert_eq!(delivery, Delivery::Sent);
    }
    let mut seen = read_events(&mut remote);

    t.disconnect(id, "test").unwrap();
    drop(remote);
    for i in 3..6u8 {
        let delivery = t.send_event(id, &Event::new(1, 0, vec![i]), None).await.unwrap();
        assert_eq!(delivery, Delivery::Queued);
    }
    assert_eq!(t.node(id).unwrap().queued(), 3);

    let mut remote = handshake(&mut t, id, 1 << 20).await;
    let delivery = t.send_event(id, &Event::new(1, 0, vec![6u8]), None).await.unwrap();
    assert_eq!(delivery, Delivery::Sent);
    seen.extend(read_events(&mut remote));

    let expected: Vec<Vec<u8>> = (0..7u8).map(|i| vec![i]).collect();
    assert_eq!(bodies(&seen), expected);

    let stats = t.node(id).unwrap().stats();
    assert_eq!(stats.events.sent, 7 + 2);
    assert_eq!(stats.events.logged, 0);
    assert_eq!(stats.events.dropped, 0);
}

#[test]
fn test_backlog_spill_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.binlog");
    let mut backlog = Backlog::create(Some(path.clone()), 100, 1000, true).unwrap();

    for i in 0..25u8 {
        backlog.add(&[i; 40]).unwrap();
    }
    assert_eq!(backlog.num_entries(), 25);
    // two entries in memory, the other 23 on disk with a 4-byte prefix each
    assert_eq!(backlog.mem_bytes(), 80);
    assert_eq!(backlog.file_bytes(), 23 * 44);
    assert!(path.exists());

    let mut remaining = backlog.num_entries();
    for i in 0..25u8 {
        let entry = backlog.read().unwrap().unwrap();
        assert_eq!(entry.as_ref(), &[i; 40]);
        if i < 2 {
            assert!(backlog.is_spilled());
        }
        if i >= 1 {
            // memory is exhausted, so everything from here on is served from disk
            assert_eq!(backlog.mem_bytes(), 0);
        }
        if i < 24 {
            assert!(backlog.file_bytes() > 0);
            assert!(path.exists());
        }
        assert_eq!(backlog.num_entries(), remaining - 1);
        remaining -= 1;
    }

    assert_eq!(backlog.file_bytes(), 0);
    assert!(backlog.read().unwrap().is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_handshake_rejected_on_word_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("poller-1", NodeRole::Poller));

    let (ours, mut remote) = MemoryLink::pair(1 << 20);
    t.accept(id, Box::new(ours)).await.unwrap();
    read_events(&mut remote);

    let mut theirs = t.local_info();
    theirs.word_size = if theirs.word_size == 64 { 32 } else { 64 };
    let active = Event::ctrl(ctrl::ACTIVE, dest::BROADCAST, theirs.encode().to_vec());
    remote.try_write(&active.encode()).unwrap();

    let err = t.receive(id).unwrap_err();
    assert!(matches!(
        err,
        TransportError::Incompatible(Incompatibility::WordSize { .. })
    ));
    let node = t.node(id).unwrap();
    assert_eq!(node.state(), NodeState::None);
    assert!(node.incompatibility().is_some());
}

#[tokio::test]
async fn test_corrupt_length_prefix_wipes_backlog() {
    let dir = tempfile::tempdir().unwrap();
    // nothing fits in memory, so every queued event goes to disk
    let mut t = transport(dir.path(), 0);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));

    for i in 0..3u8 {
        t.send_event(id, &Event::new(1, 0, vec![i; 16]), None).await.unwrap();
    }
    let path = t.node(id).unwrap().backlog().unwrap().path().unwrap().to_path_buf();
    assert!(path.exists());

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&u32::MAX.to_le_bytes()).unwrap();
    drop(file);

    let mut remote = handshake(&mut t, id, 1 << 20).await;
    assert_eq!(t.drain(id).await.unwrap(), DrainOutcome::Wiped { lost: 3 });

    let node = t.node(id).unwrap();
    assert_eq!(node.queued(), 0);
    assert_eq!(node.stats().events.wiped, 3);
    assert!(node.is_out_of_sync());
    assert!(node.is_connected());
    assert!(!path.exists());
    assert!(read_events(&mut remote).is_empty());

    // the node keeps working afterwards
    let delivery = t.send_event(id, &Event::new(1, 0, &b"after"[..]), None).await.unwrap();
    assert_eq!(delivery, Delivery::Sent);
}

#[tokio::test]
async fn test_bad_signature_disconnects() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));
    let mut remote = handshake(&mut t, id, 1 << 20).await;

    let mut packet = Event::new(1, 0, &b"x"[..]).encode();
    packet[0] = b'X';
    remote.try_write(&packet).unwrap();

    assert!(matches!(t.receive(id), Err(TransportError::Protocol(_))));
    assert_eq!(t.node(id).unwrap().state(), NodeState::None);
}

#[tokio::test]
async fn test_events_before_bad_packet_are_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));
    let mut remote = handshake(&mut t, id, 1 << 20).await;

    remote.try_write(&Event::new(1, 0, &b"valid-1"[..]).encode()).unwrap();
    remote.try_write(&Event::new(1, 0, &b"valid-2"[..]).encode()).unwrap();
    remote.try_write(&[0x42; HEADER_SIZE]).unwrap();

    let events = t.receive(id).unwrap();
    assert_eq!(bodies(&events), vec![b"valid-1".to_vec(), b"valid-2".to_vec()]);

    let node = t.node(id).unwrap();
    assert_eq!(node.state(), NodeState::None);
    // the handshake reply plus both data events
    assert_eq!(node.stats().events.read, 3);
}

#[tokio::test]
async fn test_events_before_hangup_are_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));
    let mut remote = handshake(&mut t, id, 1 << 20).await;

    remote.try_write(&Event::new(1, 0, &b"goodbye"[..]).encode()).unwrap();
    drop(remote);

    let events = t.receive(id).unwrap();
    assert_eq!(bodies(&events), vec![b"goodbye".to_vec()]);
    assert!(matches!(
        t.receive(id),
        Err(TransportError::ConnectionClosed)
    ));
    assert_eq!(t.node(id).unwrap().state(), NodeState::None);
}

#[tokio::test(start_paused = true)]
async fn test_partial_write_falls_back_to_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let id = t.add_node(Node::new("peer-a", NodeRole::Peer));
    let mut remote = handshake(&mut t, id, 1024).await;

    let big = Event::new(1, 0, vec![7u8; 2000]);
    let delivery = t.send_event(id, &big, None).await.unwrap();
    assert_eq!(delivery, Delivery::Queued);
    assert_eq!(remote.try_read(&mut [0u8; 1024]).unwrap(), 1024);

    let node = t.node(id).unwrap();
    assert_eq!(node.state(), NodeState::None);
    assert_eq!(node.queued(), 1);
    drop(remote);

    let mut remote = handshake(&mut t, id, 1 << 20).await;
    assert_eq!(t.drain(id).await.unwrap(), DrainOutcome::Drained { sent: 1 });
    let events = read_events(&mut remote);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].body().len(), 2000);
}

#[tokio::test]
async fn test_state_callback_sees_connect_and_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = transport(dir.path(), 1 << 20);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = t.add_node(
        Node::new("master", NodeRole::Master)
            .on_state_change(move |id, from, to| {
                let _ = tx.send((id, from, to));
            }),
    );

    let remote = handshake(&mut t, id, 1 << 20).await;
    drop(remote);
    assert!(matches!(
        t.receive(id),
        Err(TransportError::ConnectionClosed)
    ));

    assert_eq!(
        rx.recv().await.unwrap(),
        (id, NodeState::Negotiating, NodeState::Connected)
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        (id, NodeState::Connected, NodeState::None)
    );
}

#[tokio::test]
async fn test_tcp_nodes_connect_and_exchange_events() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let listener = Listener::bind(&NodeAddress::Tcp("127.0.0.1:0".parse().unwrap()))
        .await
        .unwrap();

    let mut a = transport(dir_a.path(), 1 << 20);
    let b_on_a = a.add_node(
        Node::new("b", NodeRole::Peer).with_address(listener.local_addr().unwrap()),
    );
    let mut b = transport(dir_b.path(), 1 << 20);
    let a_on_b = b.add_node(Node::new("a", NodeRole::Peer).accept_only());

    // queued before the link exists
    a.send_event(b_on_a, &Event::new(3, 0, &b"early"[..]), None)
        .await
        .unwrap();

    let mut inbound = Vec::new();
    for _ in 0..500 {
        a.poll_once().await;
        if !b.node(a_on_b).unwrap().has_link() {
            if let Ok(Ok(accepted)) =
                tokio::time::timeout(Duration::from_millis(5), listener.accept()).await
            {
                b.accept(a_on_b, accepted.link).await.unwrap();
            }
        }
        inbound.extend(b.poll_once().await);
        if !inbound.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(a.node(b_on_a).unwrap().is_connected());
    assert!(b.node(a_on_b).unwrap().is_connected());
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].0, a_on_b);
    assert_eq!(inbound[0].1.body(), b"early");
    assert_eq!(inbound[0].1.header.sender(), "integration");
    assert!(inbound[0].1.packet_size() > HEADER_SIZE);
}
