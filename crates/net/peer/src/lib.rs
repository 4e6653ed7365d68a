//! Connection controller for overlay peers.
//!
//! A [`Peer`] unifies the outbound (dial) and inbound (accept) paths into one
//! state machine:
//!
//! ```text
//! UNBOUND --connect--> CONNECTING --dial ok--> CONNECTED
//!    |                     |                       |
//!    +--accept-------------|--------------------> CONNECTED
//!    |                     |                       |
//!    +---------------------+-----destroy-----------+--> DESTROYED
//! ```
//!
//! Bytes from the channel are framed by [`overlay_net_codec::FrameDecoder`].
//! Decoded packets are forwarded as [`PeerEvent::Packet`]; decode errors are
//! reported as [`PeerEvent::Error`] and penalize the peer's [`BanScore`].
//! Crossing the ban threshold emits [`PeerEvent::Ban`] once. The owner, usually a
//! [`PeerRegistry`], decides whether to disconnect.

mod address;
mod channel;
mod config;
mod driver;
mod error;
mod events;
mod handshake;
mod identity;
mod peer;
mod registry;
mod score;
mod state;

pub use address::{AddressParseError, PeerAddress};
pub use channel::{Channel, Dialer, TcpDialer};
pub use config::{BanPenalties, ConfigError, PeerConfig};
pub use error::{DialError, PeerError};
pub use events::{EventEmitter, FaultCause, PeerEvent, PeerFault};
pub use handshake::HandshakeState;
pub use identity::NodeIdentity;
pub use peer::Peer;
pub use registry::{PeerRegistry, RegisterResult, RegistryEvent};
pub use score::BanScore;
pub use state::{ConnectionDirection, ConnectionState, PeerSnapshot};
