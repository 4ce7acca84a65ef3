use std::fmt;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Light block reference: just enough to order blocks and detect reorgs.
///
/// Within one canonical chain, `parent_hash` of block `n` equals the hash of
/// block `n - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
}

impl BlockRef {
    pub fn new(hash: B256, parent_hash: B256, number: u64, timestamp: u64) -> Self {
        Self {
            hash,
            parent_hash,
            number,
            timestamp,
        }
    }

    /// Checks whether `child` directly extends this block.
    pub fn is_parent_of(&self, child: &BlockRef) -> bool {
        child.parent_hash == self.hash && child.number == self.number + 1
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, &self.hash.to_string()[..10])
    }
}
