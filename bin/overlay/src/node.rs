//! Node runtime: accepts and dials peers, answers pings.

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use overlay_net_codec::{Packet, PacketType};
use overlay_net_peer::{
    NodeIdentity, Peer, PeerAddress, PeerConfig, PeerRegistry, RegisterResult, RegistryEvent,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::cli::NodeArgs;

pub(crate) async fn run(args: NodeArgs) -> Result<()> {
    let config = Arc::new(load_config(args.config.as_deref())?);
    let identity = args
        .node_key
        .map(NodeIdentity::new)
        .unwrap_or_else(random_identity);
    info!(%identity, "Starting overlay node");

    let registry = Arc::new(PeerRegistry::new());
    tokio::spawn(handle_events(registry.clone()));

    for address in args.connect {
        let peer = Peer::from_outbound(config.clone(), identity.clone(), address);
        start_peer(&registry, peer, &identity);
    }

    let listener = match args.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .wrap_err_with(|| format!("failed to listen on {addr}"))?;
            info!(%addr, "Listening for peers");
            Some(listener)
        }
        None => None,
    };

    tokio::select! {
        () = accept_loop(listener, &registry, &config, &identity) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }

    registry.destroy_all();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PeerConfig> {
    match path {
        Some(path) => PeerConfig::from_file(path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display())),
        None => Ok(PeerConfig::default()),
    }
}

fn random_identity() -> NodeIdentity {
    let bytes: [u8; 16] = rand::random();
    let key: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    NodeIdentity::new(key)
}

async fn accept_loop(
    listener: Option<TcpListener>,
    registry: &Arc<PeerRegistry>,
    config: &Arc<PeerConfig>,
    identity: &NodeIdentity,
) {
    let Some(listener) = listener else {
        return std::future::pending().await;
    };

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(error) => {
                warn!(%error, "Failed to accept connection");
                continue;
            }
        };

        match Peer::from_inbound(config.clone(), identity.clone(), stream) {
            Ok(peer) => start_peer(registry, peer, identity),
            Err(error) => warn!(%error, "Failed to accept peer"),
        }
    }
}

/// Register `peer`, then open it and introduce ourselves.
fn start_peer(registry: &Arc<PeerRegistry>, peer: Peer, identity: &NodeIdentity) {
    let peer = Arc::new(peer);
    match registry.register(peer.clone()) {
        Ok(RegisterResult::New) => {}
        Ok(RegisterResult::Duplicate) => return,
        Err(error) if error.is_misuse() => {
            error!(%error, "Failed to register peer");
            return;
        }
        // Connections that die before registration are routine.
        Err(error) => {
            debug!(%error, "Peer closed before registration");
            return;
        }
    }

    let hello = Packet::new(PacketType::Hello, identity.as_str());
    tokio::spawn(async move {
        match peer.open().await {
            Ok(_) => {
                info!(status = %peer.status(), "Peer open");
                if let Err(error) = peer.send(&hello) {
                    debug!(%error, "Failed to send hello");
                }
            }
            Err(error) => warn!(peer = ?peer.id().ok(), %error, "Failed to open peer"),
        }
    });
}

async fn handle_events(registry: Arc<PeerRegistry>) {
    let mut events = registry.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Registry event subscriber lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            RegistryEvent::PeerAdded(id) => info!(peer = %id, "Peer added"),
            RegistryEvent::PeerRemoved(id) => info!(peer = %id, "Peer removed"),
            RegistryEvent::PeerBanned(id) => warn!(peer = %id, "Peer banned"),
            RegistryEvent::Packet { id, packet } => handle_packet(&registry, &id, packet),
        }
    }
}

fn handle_packet(registry: &PeerRegistry, id: &PeerAddress, packet: Packet) {
    let reply = match packet.packet_type() {
        PacketType::Hello => {
            info!(peer = %id, node = packet.body(), "Peer introduced itself");
            Packet::new(PacketType::Ping, "0")
        }
        PacketType::Ping => Packet::new(PacketType::Pong, packet.into_body()),
        PacketType::Pong => {
            debug!(peer = %id, body = packet.body(), "Pong received");
            return;
        }
        PacketType::Order | PacketType::GetOrders | PacketType::Orders => {
            debug!(peer = %id, %packet, "Ignoring order packet");
            return;
        }
    };

    if let Some(peer) = registry.get(id)
        && let Err(error) = peer.send(&reply)
    {
        debug!(peer = %id, %error, "Failed to reply");
    }
}
