//! Handshake outcome placeholder.

use serde::{Deserialize, Serialize};

/// State negotiated while opening a connection.
///
/// No handshake is exchanged yet, so every opened peer is `Unauthenticated`.
/// Variants carrying negotiated data (listen port, node key, version, pairs)
/// get added here once the exchange exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HandshakeState {
    #[default]
    Unauthenticated,
}
