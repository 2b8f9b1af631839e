use serde::{Deserialize, Serialize};

/// Cursor uniquely identifies a block by its height and hash.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub height: u64,
    pub hash: String,
}

/// The subset of a block needed to follow the chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
}

impl Cursor {
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }
}

impl BlockHeader {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            height: self.height,
            hash: self.hash.clone(),
        }
    }

    /// Returns true if `self` is the direct child of `parent`.
    pub fn is_child_of(&self, parent: &BlockHeader) -> bool {
        self.height == parent.height + 1 && self.parent_hash == parent.hash
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cursor(h={} hash={})", self.height, self.hash)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.height, self.hash)
    }
}

impl std::fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.height, self.hash)
    }
}

pub mod testing {
    use super::BlockHeader;

    /// Returns a test block hash that depends on the block height and chain.
    pub fn new_test_hash(height: u64, chain: u8) -> String {
        format!("0x{height:08x}{chain:02x}")
    }

    /// Returns a new test header whose parent is the block at `height - 1` on the same chain.
    pub fn new_test_header(height: u64, chain: u8) -> BlockHeader {
        let parent_hash = match height {
            0 => "0x0".to_string(),
            _ => new_test_hash(height - 1, chain),
        };

        BlockHeader {
            height,
            hash: new_test_hash(height, chain),
            parent_hash,
        }
    }
}
