//! Connection state, direction and telemetry timestamps.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::address::PeerAddress;

/// Who initiated the connection. Fixed at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionDirection {
    /// Initiated by the remote node.
    Inbound,
    /// Initiated by us.
    Outbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        })
    }
}

/// Controller lifecycle state (stored as u8 for atomic operations).
///
/// Moves forward only. Inbound peers go straight from `Unbound` to `Connected`;
/// `Destroyed` is reachable from every state and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Unbound = 0,
    Connecting = 1,
    Connected = 2,
    Destroyed = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unbound,
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Destroyed,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

/// Wall-clock markers in unix milliseconds; zero until the event first happens.
#[derive(Debug, Default)]
pub(crate) struct Timestamps {
    connect_time: AtomicU64,
    last_send: AtomicU64,
    last_recv: AtomicU64,
}

impl Timestamps {
    pub(crate) fn mark_connected(&self) {
        self.connect_time
            .fetch_max(current_unix_millis(), Ordering::Relaxed);
    }

    pub(crate) fn mark_send(&self) {
        self.last_send
            .fetch_max(current_unix_millis(), Ordering::Relaxed);
    }

    pub(crate) fn mark_recv(&self) {
        self.last_recv
            .fetch_max(current_unix_millis(), Ordering::Relaxed);
    }

    pub(crate) fn connect_time(&self) -> u64 {
        self.connect_time.load(Ordering::Relaxed)
    }

    pub(crate) fn last_send(&self) -> u64 {
        self.last_send.load(Ordering::Relaxed)
    }

    pub(crate) fn last_recv(&self) -> u64 {
        self.last_recv.load(Ordering::Relaxed)
    }
}

/// Serializable view of a peer for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: Option<PeerAddress>,
    pub direction: Option<ConnectionDirection>,
    pub state: ConnectionState,
    pub ban_score: u32,
    pub banned: bool,
    pub connect_time: u64,
    pub last_send: u64,
    pub last_recv: u64,
}

fn current_unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            ConnectionState::Unbound,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Destroyed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Destroyed.is_destroyed());
        assert!(!ConnectionState::Connected.is_destroyed());
    }

    #[test]
    fn test_timestamps_start_at_zero() {
        let timestamps = Timestamps::default();
        assert_eq!(timestamps.connect_time(), 0);
        assert_eq!(timestamps.last_send(), 0);

        timestamps.mark_send();
        let first = timestamps.last_send();
        assert!(first > 0);

        timestamps.mark_send();
        assert!(timestamps.last_send() >= first);
        assert_eq!(timestamps.last_recv(), 0);
    }
}
