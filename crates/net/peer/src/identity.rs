//! Local node identity injected into every controller.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity this node presents to peers.
///
/// Currently an opaque key string; the handshake will replace it with a keypair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(Arc<str>);

impl NodeIdentity {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct NodeSection {
        identity: NodeIdentity,
    }

    #[test]
    fn test_identity_is_a_plain_string_in_config() {
        let section: NodeSection = toml::from_str(r#"identity = "node-a""#).unwrap();
        assert_eq!(section.identity, NodeIdentity::new("node-a"));
        assert_eq!(section.identity.to_string(), "node-a");

        let value = toml::Value::try_from(&section.identity).unwrap();
        assert_eq!(value.as_str(), Some("node-a"));
    }
}
