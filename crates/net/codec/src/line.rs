//! `<tag> <body>\r\n` codec.

use bytes::{BufMut, BytesMut};

use crate::error::FrameError;
use crate::packet::{Packet, PacketType};

const DELIMITER: &[u8] = b"\r\n";
const SEPARATOR: char = ' ';

/// Default upper bound for a single line, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Codec for CRLF-terminated packet lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    /// Set after an oversized line was rejected; bytes are dropped until the next CRLF.
    discarding: bool,
    /// Bytes of `src` already searched for a delimiter.
    next_index: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            discarding: false,
            next_index: 0,
        }
    }

    /// Write `<tag> <body>\r\n` into `dst`.
    pub fn encode_packet(&self, packet: &Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = packet.to_raw();
        if body.contains(['\r', '\n']) {
            return Err(FrameError::EmbeddedDelimiter);
        }

        let packet_type = packet.packet_type();
        let tag = packet_type.as_ref();
        dst.reserve(tag.len() + 1 + body.len() + DELIMITER.len());
        dst.put_slice(tag.as_bytes());
        dst.put_u8(SEPARATOR as u8);
        dst.put_slice(body.as_bytes());
        dst.put_slice(DELIMITER);
        Ok(())
    }
}

impl asynchronous_codec::Encoder for LineCodec {
    type Item<'a> = &'a Packet;
    type Error = FrameError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_packet(item, dst)
    }
}

impl asynchronous_codec::Decoder for LineCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Step back one byte so a '\r' that ended the last read is matched.
            let from = self
                .next_index
                .saturating_sub(DELIMITER.len() - 1)
                .min(src.len());
            let Some(end) = find_delimiter(src, from) else {
                if self.discarding {
                    discard_partial(src);
                    self.next_index = src.len();
                    return Ok(None);
                }
                if src.len() > self.max_line_length {
                    let len = src.len();
                    discard_partial(src);
                    self.next_index = src.len();
                    self.discarding = true;
                    return Err(FrameError::FrameTooLarge {
                        len,
                        max: self.max_line_length,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };
            self.next_index = 0;

            let mut line = src.split_to(end + DELIMITER.len());
            line.truncate(end);

            if self.discarding {
                // Tail of the oversized line, already reported.
                self.discarding = false;
                continue;
            }

            if line.len() > self.max_line_length {
                return Err(FrameError::FrameTooLarge {
                    len: line.len(),
                    max: self.max_line_length,
                });
            }

            return parse_line(&line).map(Some);
        }
    }
}

/// Drop buffered bytes of an unterminated line, keeping a trailing '\r' in case
/// the '\n' arrives in the next chunk.
fn discard_partial(src: &mut BytesMut) {
    let keep = usize::from(src.last() == Some(&b'\r'));
    let _ = src.split_to(src.len() - keep);
}

fn find_delimiter(src: &[u8], from: usize) -> Option<usize> {
    src.get(from..)?
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
        .map(|position| from + position)
}

fn parse_line(line: &[u8]) -> Result<Packet, FrameError> {
    let text = std::str::from_utf8(line).map_err(|_| FrameError::unparsable(line))?;

    let Some((tag, body)) = text.split_once(SEPARATOR) else {
        return Err(FrameError::unparsable(line));
    };
    if tag.is_empty() {
        return Err(FrameError::unparsable(line));
    }

    let packet_type = tag
        .parse::<PacketType>()
        .map_err(|_| FrameError::UnknownPacketType {
            tag: tag.to_owned(),
        })?;

    Ok(Packet::new(packet_type, body))
}
