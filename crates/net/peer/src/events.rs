//! Peer events and non-blocking broadcast emitter.

use std::io;
use std::sync::Arc;

use overlay_net_codec::{FrameError, Packet};
use tokio::sync::broadcast;

use crate::handshake::HandshakeState;

/// What went wrong on a connection.
#[derive(Debug, Clone)]
pub enum FaultCause {
    /// Read or write failure on the channel.
    Transport(Arc<io::Error>),
    /// The remote side closed the channel.
    Hangup,
    /// Bytes the frame decoder rejected.
    Decode(FrameError),
}

/// Payload of [`PeerEvent::Error`].
#[derive(Debug, Clone)]
pub struct PeerFault {
    pub description: String,
    pub cause: FaultCause,
}

impl PeerFault {
    pub(crate) fn new(description: impl Into<String>, cause: FaultCause) -> Self {
        Self {
            description: description.into(),
            cause,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self.cause, FaultCause::Decode(_))
    }
}

/// Events a peer emits to its owner.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Ready for use; carries the handshake outcome.
    Open(HandshakeState),
    /// Outbound dial succeeded.
    Connect,
    /// Decoded packet from the remote node.
    Packet(Packet),
    /// Channel or decode fault.
    Error(PeerFault),
    /// Ban score reached the threshold.
    Ban,
    /// Teardown complete, channel released. Always the last event.
    Close,
}

impl PeerEvent {
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(self, Self::Open(_) | Self::Connect | Self::Close)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Slow subscribers drop events independently.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PeerEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use overlay_net_codec::PacketType;

    use super::*;

    #[tokio::test]
    async fn test_event_emitter_multiple_subscribers() {
        let emitter = EventEmitter::default();
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PeerEvent::Packet(Packet::new(PacketType::Ping, "1")));

        assert_matches!(rx1.recv().await.unwrap(), PeerEvent::Packet(p) if p.body() == "1");
        assert_matches!(rx2.recv().await.unwrap(), PeerEvent::Packet(p) if p.body() == "1");
    }

    #[test]
    fn test_event_emitter_no_subscribers() {
        let emitter = EventEmitter::default();

        // Should not panic even with no subscribers
        emitter.emit(PeerEvent::Ban);
        emitter.emit(PeerEvent::Close);
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[test]
    fn test_event_classification() {
        assert!(PeerEvent::Open(HandshakeState::default()).is_lifecycle_event());
        assert!(PeerEvent::Close.is_close());
        assert!(!PeerEvent::Ban.is_lifecycle_event());

        let fault = PeerFault::new("bad frame", FaultCause::Decode(FrameError::EmbeddedDelimiter));
        assert!(fault.is_decode());
        assert!(!PeerFault::new("hangup", FaultCause::Hangup).is_decode());
    }
}
