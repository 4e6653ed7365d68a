//! Decode and encode errors for the line codec.

use std::io;
use std::sync::Arc;

/// Longest payload excerpt kept in an [`FrameError::Unparsable`] error.
const MAX_PAYLOAD_EXCERPT: usize = 256;

/// Framing error.
///
/// Cloneable so it can travel inside broadcast events.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// The line could not be interpreted as `<tag> <body>`.
    #[error("unparsable message: {payload}")]
    Unparsable { payload: String },

    /// The line is well formed but carries a tag we do not know.
    #[error("unknown packet type: {tag}")]
    UnknownPacketType { tag: String },

    /// No line terminator within the configured limit.
    #[error("frame of {len} bytes exceeds max line length {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The body would break framing.
    #[error("packet body contains a line terminator")]
    EmbeddedDelimiter,

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl FrameError {
    pub(crate) fn unparsable(line: &[u8]) -> Self {
        let excerpt = line.get(..MAX_PAYLOAD_EXCERPT).unwrap_or(line);
        Self::Unparsable {
            payload: String::from_utf8_lossy(excerpt).into_owned(),
        }
    }

    /// Whether the error came out of the decode path (as opposed to encoding or IO).
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Unparsable { .. } | Self::UnknownPacketType { .. } | Self::FrameTooLarge { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unparsable { .. } => "unparsable",
            Self::UnknownPacketType { .. } => "unknown_packet_type",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::EmbeddedDelimiter => "embedded_delimiter",
            Self::Io(_) => "io",
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}
