//! Controller errors.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use overlay_net_codec::FrameError;

/// Outbound dial failure, returned from `Peer::open`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DialError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for DialError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

/// Errors returned by [`Peer`](crate::Peer) operations.
///
/// `NotBound`, `AlreadyBound` and `AlreadyOpened` signal a caller defect rather
/// than a runtime fault.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer has no channel bound")]
    NotBound,

    #[error("peer already has a channel bound")]
    AlreadyBound,

    #[error("peer was already opened")]
    AlreadyOpened,

    #[error("peer was destroyed")]
    Destroyed,

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("codec error: {0}")]
    Codec(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PeerError {
    /// Whether the error is a precondition violation by the caller.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::NotBound | Self::AlreadyBound | Self::AlreadyOpened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_is_distinguished_from_lifecycle_errors() {
        assert!(PeerError::NotBound.is_misuse());
        assert!(PeerError::AlreadyBound.is_misuse());
        assert!(PeerError::AlreadyOpened.is_misuse());

        assert!(!PeerError::Destroyed.is_misuse());
        assert!(!PeerError::Dial(DialError::Timeout(Duration::from_secs(1))).is_misuse());
    }
}
