//! Push-style decoding over [`LineCodec`].

use asynchronous_codec::Decoder;
use bytes::BytesMut;

use crate::error::FrameError;
use crate::line::LineCodec;
use crate::packet::Packet;

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Owns the partial-frame buffer of one connection.
///
/// Bytes go in through [`feed`](Self::feed) in arrival order; complete frames
/// come out as packets or decode errors, in the order they appeared on the wire.
#[derive(Debug)]
pub struct FrameDecoder {
    codec: LineCodec,
    buffer: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(LineCodec::default())
    }
}

impl FrameDecoder {
    pub fn new(codec: LineCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self::new(LineCodec::new(max_line_length))
    }

    /// Append a chunk and drain every frame it completes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Packet, FrameError>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(packet)) => frames.push(Ok(packet)),
                Ok(None) => break,
                Err(error) => frames.push(Err(error)),
            }
        }
        frames
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
