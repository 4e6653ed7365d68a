//! Line framing for overlay peer packets.
//!
//! Every packet travels as a single text line: `<type-tag> <body>\r\n`. The
//! [`LineCodec`] implements the `asynchronous_codec` traits for that format and
//! [`FrameDecoder`] wraps it for push-style decoding, where a connection feeds
//! raw chunks in and gets back decoded packets or typed [`FrameError`]s.

mod decoder;
mod error;
mod line;
mod packet;

pub use decoder::FrameDecoder;
pub use error::FrameError;
pub use line::{DEFAULT_MAX_LINE_LENGTH, LineCodec};
pub use packet::{Packet, PacketType};
