//! Owning registry of live peers, keyed by connection identity.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use overlay_net_codec::Packet;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::address::PeerAddress;
use crate::error::PeerError;
use crate::events::PeerEvent;
use crate::peer::Peer;

const REGISTRY_EVENT_CAPACITY: usize = 1024;

/// Result of a peer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    New,
    /// A peer with the same identity is already registered; the newcomer was destroyed.
    Duplicate,
}

/// Events re-broadcast by the registry to the application.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    PeerAdded(PeerAddress),
    PeerRemoved(PeerAddress),
    PeerBanned(PeerAddress),
    Packet { id: PeerAddress, packet: Packet },
}

/// Live peers by identity.
///
/// Each registered peer is supervised: `Ban` destroys it and `Close` removes it.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerAddress, Arc<Peer>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(REGISTRY_EVENT_CAPACITY);
        Self {
            peers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a bound peer and start supervising it.
    ///
    /// Must be called within a tokio runtime.
    pub fn register(self: &Arc<Self>, peer: Arc<Peer>) -> Result<RegisterResult, PeerError> {
        let id = peer.id()?;
        // Subscribe before the peer is visible so no event is missed.
        let events = peer.subscribe();
        // A peer torn down before the subscription has already emitted `Close`.
        if peer.state().is_destroyed() {
            debug!(peer = %id, "Refusing to register a destroyed peer");
            return Err(PeerError::Destroyed);
        }

        {
            let mut peers = self.peers.write();
            if peers.contains_key(&id) {
                drop(peers);
                debug!(peer = %id, "Rejecting duplicate connection");
                peer.destroy();
                return Ok(RegisterResult::Duplicate);
            }
            peers.insert(id.clone(), peer.clone());
        }

        peer.set_registry(self);
        let _ = self.events.send(RegistryEvent::PeerAdded(id.clone()));
        debug!(peer = %id, direction = ?peer.direction(), "Peer registered");

        tokio::spawn(supervise(
            Arc::downgrade(self),
            Arc::downgrade(&peer),
            id,
            events,
        ));
        Ok(RegisterResult::New)
    }

    pub fn get(&self, id: &PeerAddress) -> Option<Arc<Peer>> {
        self.peers.read().get(id).cloned()
    }

    pub fn contains(&self, id: &PeerAddress) -> bool {
        self.peers.read().contains_key(id)
    }

    /// Remove a peer without destroying it.
    pub fn remove(&self, id: &PeerAddress) -> Option<Arc<Peer>> {
        let removed = self.peers.write().remove(id);
        if removed.is_some() {
            let _ = self.events.send(RegistryEvent::PeerRemoved(id.clone()));
        }
        removed
    }

    pub fn ids(&self) -> Vec<PeerAddress> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy and remove every registered peer.
    pub fn destroy_all(&self) {
        let drained: Vec<_> = self.peers.write().drain().collect();
        for (id, peer) in drained {
            peer.destroy();
            let _ = self.events.send(RegistryEvent::PeerRemoved(id));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Remove `id` only if it still maps to `peer`.
    fn remove_exact(&self, id: &PeerAddress, peer: &Weak<Peer>) -> bool {
        let mut peers = self.peers.write();
        let matches = peers
            .get(id)
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), peer.as_ptr()));
        if matches {
            peers.remove(id);
        }
        matches
    }
}

async fn supervise(
    registry: Weak<PeerRegistry>,
    peer: Weak<Peer>,
    id: PeerAddress,
    mut events: broadcast::Receiver<PeerEvent>,
) {
    let mut banned = false;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(peer = %id, skipped, "Peer event subscriber lagged");
                // `Ban` is emitted once; recover a dropped one from the score.
                match peer.upgrade() {
                    Some(peer) if peer.is_banned() && !banned => PeerEvent::Ban,
                    _ => continue,
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(registry) = registry.upgrade() else {
            break;
        };

        if event.is_lifecycle_event() {
            trace!(peer = %id, ?event, "Supervising peer");
        }

        match event {
            PeerEvent::Packet(packet) => {
                let _ = registry.events.send(RegistryEvent::Packet {
                    id: id.clone(),
                    packet,
                });
            }
            PeerEvent::Ban if banned => {}
            PeerEvent::Ban => {
                banned = true;
                warn!(peer = %id, "Peer banned, disconnecting");
                let _ = registry.events.send(RegistryEvent::PeerBanned(id.clone()));
                if let Some(peer) = peer.upgrade() {
                    peer.destroy();
                }
            }
            PeerEvent::Close => {
                if registry.remove_exact(&id, &peer) {
                    debug!(peer = %id, "Peer removed");
                    let _ = registry.events.send(RegistryEvent::PeerRemoved(id.clone()));
                }
                break;
            }
            PeerEvent::Open(_) | PeerEvent::Connect | PeerEvent::Error(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config::PeerConfig;
    use crate::identity::NodeIdentity;

    #[tokio::test]
    async fn test_register_unbound_peer_is_rejected() {
        let registry = Arc::new(PeerRegistry::new());
        let peer = Arc::new(Peer::new(
            Arc::new(PeerConfig::default()),
            NodeIdentity::new("local"),
        ));

        assert_matches!(registry.register(peer), Err(PeerError::NotBound));
        assert!(registry.is_empty());
    }
}
