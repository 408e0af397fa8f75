//! Node identity
//!
//! Each process picks a random identity at startup. On the wire it travels as
//! lowercase hex and is treated as an opaque token by receivers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-process node identifier (20 random bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Create a new NodeId from bytes
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Generate a random NodeId
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut id = [0u8; 20];
        rng.fill(&mut id);
        Self(id)
    }

    /// Get the NodeId as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a NodeId from a hex string
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let id: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Whether a wire token names this node (case-insensitive)
    pub fn matches(&self, token: &str) -> bool {
        token.eq_ignore_ascii_case(&self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_random() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn test_node_id_hex() {
        let node_id = NodeId::new([0xABu8; 20]);
        let hex_str = node_id.to_hex();
        assert_eq!(hex_str.len(), 40);
        assert_eq!(NodeId::from_hex(&hex_str), Some(node_id));
        assert_eq!(NodeId::from_hex("abcd"), None);
        assert_eq!(NodeId::from_hex("not hex"), None);
    }

    #[test]
    fn test_node_id_matches() {
        let node_id = NodeId::new([0xABu8; 20]);
        assert!(node_id.matches(&"AB".repeat(20)));
        assert!(node_id.matches(&"ab".repeat(20)));
        assert!(!node_id.matches(""));
        assert!(!node_id.matches(&"cd".repeat(20)));
    }
}
