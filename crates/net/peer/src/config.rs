//! Peer configuration.

use std::path::Path;
use std::time::Duration;

use overlay_net_codec::{DEFAULT_MAX_LINE_LENGTH, FrameError};
use serde::{Deserialize, Serialize};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BAN_THRESHOLD: u32 = 100;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Error loading a [`PeerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Ban-score penalty per decode error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanPenalties {
    /// Bytes that cannot be read as a frame at all.
    pub unparsable_message: u32,
    /// Well-formed frame with a tag we do not know.
    pub unknown_packet_type: u32,
}

impl Default for BanPenalties {
    fn default() -> Self {
        Self {
            unparsable_message: 10,
            unknown_packet_type: 20,
        }
    }
}

impl BanPenalties {
    /// Penalty for a decode error; `None` for errors that are not the peer's fault.
    pub fn penalty_for(&self, error: &FrameError) -> Option<u32> {
        match error {
            FrameError::Unparsable { .. } | FrameError::FrameTooLarge { .. } => {
                Some(self.unparsable_message)
            }
            FrameError::UnknownPacketType { .. } => Some(self.unknown_packet_type),
            FrameError::EmbeddedDelimiter | FrameError::Io(_) => None,
        }
    }
}

/// Per-connection configuration shared by all peers of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Time allowed for an outbound dial to complete.
    pub connect_timeout_ms: u64,
    /// Ban score at which the `ban` event fires.
    pub ban_threshold: u32,
    pub penalties: BanPenalties,
    /// Longest accepted frame, terminator excluded.
    pub max_line_length: usize,
    /// Broadcast channel capacity for peer events.
    pub event_channel_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            penalties: BanPenalties::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl PeerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_ban_threshold(mut self, threshold: u32) -> Self {
        self.ban_threshold = threshold;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.ban_threshold, 100);
        assert_eq!(config.penalties.unparsable_message, 10);
        assert_eq!(config.penalties.unknown_packet_type, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PeerConfig::from_toml_str(
            r#"
            connect_timeout_ms = 2500

            [penalties]
            unknown_packet_type = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout(), Duration::from_millis(2500));
        assert_eq!(config.ban_threshold, 100);
        assert_eq!(config.penalties.unparsable_message, 10);
        assert_eq!(config.penalties.unknown_packet_type, 50);
    }

    #[test]
    fn test_invalid_toml() {
        let result = PeerConfig::from_toml_str("ban_threshold = \"high\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_penalty_classification() {
        let penalties = BanPenalties::default();
        let unparsable = FrameError::Unparsable {
            payload: "x".into(),
        };
        let unknown = FrameError::UnknownPacketType { tag: "x".into() };

        assert_eq!(penalties.penalty_for(&unparsable), Some(10));
        assert_eq!(penalties.penalty_for(&unknown), Some(20));
        assert_eq!(penalties.penalty_for(&FrameError::EmbeddedDelimiter), None);
    }
}
