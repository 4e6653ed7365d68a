//! Packet type tags and the packet value carried over a connection.

use std::fmt;

/// Known packet type tags.
///
/// A frame whose tag is not listed here decodes to
/// [`FrameError::UnknownPacketType`](crate::FrameError::UnknownPacketType).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum PacketType {
    Hello,
    Ping,
    Pong,
    Order,
    GetOrders,
    Orders,
}

/// A packet: a type tag plus its already-serialized body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    body: String,
}

impl Packet {
    pub fn new(packet_type: PacketType, body: impl Into<String>) -> Self {
        Self {
            packet_type,
            body: body.into(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialized body as it appears on the wire.
    pub fn to_raw(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.packet_type, self.body.len())
    }
}
