//! Registry supervision of inbound peers.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use overlay_net_codec::PacketType;
use overlay_net_peer::{
    ConnectionState, NodeIdentity, Peer, PeerAddress, PeerConfig, PeerError, PeerEvent,
    PeerRegistry, RegisterResult, RegistryEvent,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;

fn inbound(config: PeerConfig, address: &str) -> (Arc<Peer>, DuplexStream) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let peer = Peer::from_inbound_at(
        Arc::new(config),
        NodeIdentity::new("test-node"),
        local,
        address.parse().unwrap(),
    );
    (Arc::new(peer), remote)
}

async fn next_event(events: &mut broadcast::Receiver<RegistryEvent>) -> RegistryEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for registry event")
        .expect("registry event channel closed")
}

fn id(address: &str) -> PeerAddress {
    address.parse().unwrap()
}

#[tokio::test]
async fn register_indexes_by_identity() {
    let registry = Arc::new(PeerRegistry::new());
    let mut events = registry.subscribe();
    let (peer, _remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");

    assert_eq!(registry.register(peer.clone()).unwrap(), RegisterResult::New);
    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerAdded(a) if a == id("10.0.0.1:7000"));

    assert_eq!(registry.len(), 1);
    assert!(registry.contains(&id("10.0.0.1:7000")));
    assert_eq!(registry.ids(), vec![id("10.0.0.1:7000")]);
    assert!(Arc::ptr_eq(&registry.get(&id("10.0.0.1:7000")).unwrap(), &peer));
    assert!(Arc::ptr_eq(&peer.registry().unwrap(), &registry));
}

#[tokio::test]
async fn duplicate_identity_destroys_newcomer() {
    let registry = Arc::new(PeerRegistry::new());
    let (first, _first_remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");
    let (second, _second_remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");

    assert_eq!(registry.register(first.clone()).unwrap(), RegisterResult::New);
    assert_eq!(registry.register(second.clone()).unwrap(), RegisterResult::Duplicate);

    assert_eq!(second.state(), ConnectionState::Destroyed);
    assert_eq!(first.state(), ConnectionState::Connected);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn packets_are_rebroadcast_with_identity() {
    let registry = Arc::new(PeerRegistry::new());
    let (peer, mut remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");
    registry.register(peer).unwrap();
    let mut events = registry.subscribe();

    remote.write_all(b"get_orders all\r\n").await.unwrap();

    assert_matches!(
        next_event(&mut events).await,
        RegistryEvent::Packet { id: from, packet }
            if from == id("10.0.0.1:7000") && packet.packet_type() == PacketType::GetOrders
    );
}

#[tokio::test]
async fn banned_peer_is_destroyed_and_removed() {
    let registry = Arc::new(PeerRegistry::new());
    let (peer, mut remote) = inbound(PeerConfig::default().with_ban_threshold(20), "10.0.0.1:7000");
    registry.register(peer.clone()).unwrap();
    let mut events = registry.subscribe();

    remote.write_all(b"bogus x\r\n").await.unwrap();

    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerBanned(a) if a == id("10.0.0.1:7000"));
    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerRemoved(a) if a == id("10.0.0.1:7000"));
    assert!(registry.is_empty());
    assert_eq!(peer.state(), ConnectionState::Destroyed);
}

#[tokio::test]
async fn ban_lost_to_a_lagging_supervisor_still_disconnects() {
    let config = PeerConfig {
        event_channel_capacity: 4,
        ..PeerConfig::default()
    };
    let registry = Arc::new(PeerRegistry::new());
    let (peer, mut remote) = inbound(config, "10.0.0.1:7000");
    registry.register(peer.clone()).unwrap();
    let mut events = registry.subscribe();

    // One read decodes all twenty lines, so the `Ban` after the tenth is
    // overwritten before the supervisor runs.
    remote.write_all(&b"garbage\r\n".repeat(20)).await.unwrap();

    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerBanned(a) if a == id("10.0.0.1:7000"));
    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerRemoved(a) if a == id("10.0.0.1:7000"));
    assert!(registry.is_empty());
    assert_eq!(peer.state(), ConnectionState::Destroyed);
}

#[tokio::test]
async fn destroyed_peer_is_not_registered() {
    let registry = Arc::new(PeerRegistry::new());
    let (peer, remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");
    let mut peer_events = peer.subscribe();

    drop(remote);
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), peer_events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, PeerEvent::Close) {
            break;
        }
    }

    assert_matches!(registry.register(peer.clone()), Err(PeerError::Destroyed));
    assert!(registry.is_empty());
    assert!(!registry.contains(&id("10.0.0.1:7000")));
    assert!(peer.registry().is_none());
}

#[tokio::test]
async fn closed_peer_is_removed() {
    let registry = Arc::new(PeerRegistry::new());
    let (peer, remote) = inbound(PeerConfig::default(), "10.0.0.1:7000");
    registry.register(peer).unwrap();
    let mut events = registry.subscribe();

    drop(remote);

    assert_matches!(next_event(&mut events).await, RegistryEvent::PeerRemoved(_));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn destroy_all_tears_down_every_peer() {
    let registry = Arc::new(PeerRegistry::new());
    let (a, _remote_a) = inbound(PeerConfig::default(), "10.0.0.1:7000");
    let (b, _remote_b) = inbound(PeerConfig::default(), "10.0.0.2:7000");
    registry.register(a.clone()).unwrap();
    registry.register(b.clone()).unwrap();

    registry.destroy_all();

    assert!(registry.is_empty());
    assert_eq!(a.state(), ConnectionState::Destroyed);
    assert_eq!(b.state(), ConnectionState::Destroyed);
}
