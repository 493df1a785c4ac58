use serde::{Deserialize, Serialize};
use std::fmt;

pub const ROOT_KEY: &str = "root";

/// Opaque node identity, unique within a state and stable across clones
/// of the same logical node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn root() -> Self {
        NodeKey(ROOT_KEY.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        NodeKey(value.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(value: String) -> Self {
        NodeKey(value)
    }
}

/// Sequential key generator, one per editor
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    count: u64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Generate next sequential key
    pub fn next_key(&mut self) -> NodeKey {
        self.count += 1;
        NodeKey(self.count.to_string())
    }

    /// Skip past a key issued elsewhere so it is never generated again
    pub fn observe(&mut self, key: &NodeKey) {
        if let Ok(n) = key.0.parse::<u64>() {
            self.count = self.count.max(n);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_keys() {
        let mut keys = KeyGenerator::new();
        assert_eq!(keys.next_key().as_str(), "1");
        assert_eq!(keys.next_key().as_str(), "2");
        assert_eq!(keys.count(), 2);
    }

    #[test]
    fn test_root_key() {
        assert!(NodeKey::root().is_root());
        assert!(!NodeKey::from("1").is_root());
    }
}
