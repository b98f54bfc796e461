//! Block interlinks.
//!
//! Every block carries a vector of references to the most recent
//! superblocks before it. Position 0 is always genesis; the remaining
//! entries are ordered from the highest level down, so a new superblock of
//! level μ replaces the last μ entries of its parent's vector.

use crate::policy::GENESIS_HEIGHT;
use crate::{Block, Hash};
use serde::{Deserialize, Serialize};

/// Interlink vector of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockInterlink {
    /// Referenced block hashes, genesis first.
    pub hashes: Vec<Hash>,
}

impl BlockInterlink {
    /// Create from hashes.
    pub fn new(hashes: Vec<Hash>) -> Self {
        Self { hashes }
    }

    /// Digest committed to by the header.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(1 + self.hashes.len() * Hash::SIZE);
        buf.push(self.hashes.len() as u8);
        for hash in &self.hashes {
            buf.extend_from_slice(hash.as_bytes());
        }
        Hash::digest(&buf)
    }

    /// Whether `hash` is referenced.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the vector is empty (genesis only).
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Interlink vector of the block following `prev`.
    pub fn for_successor(prev: &Block) -> Self {
        let prev_hash = prev.hash();
        if prev.height() == GENESIS_HEIGHT || prev.interlink.is_empty() {
            return Self::new(vec![prev_hash]);
        }

        let level = prev.level() as usize;
        if level == 0 {
            return prev.interlink.clone();
        }

        let genesis = prev.interlink.hashes[0];
        let tail = &prev.interlink.hashes[1..];

        let mut hashes = vec![genesis];
        if tail.len() > level {
            hashes.extend_from_slice(&tail[..tail.len() - level]);
        }
        hashes.extend(std::iter::repeat(prev_hash).take(level));
        Self::new(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, BlockBody, BlockHeader};

    fn block(height: u32, prev: Option<&Block>, nonce: u32) -> Block {
        let interlink = prev.map(BlockInterlink::for_successor).unwrap_or_default();
        let header = BlockHeader {
            version: 1,
            prev_hash: prev.map(Block::hash).unwrap_or_default(),
            interlink_hash: interlink.hash(),
            body_hash: BlockBody::new(Address::default(), vec![]).hash(),
            accounts_hash: Hash::default(),
            n_bits: 0,
            height,
            timestamp: height,
            nonce,
        };
        Block::new(header, interlink, None)
    }

    #[test]
    fn test_first_successor_points_to_genesis() {
        let genesis = block(1, None, 0);
        let interlink = BlockInterlink::for_successor(&genesis);
        assert_eq!(interlink.hashes, vec![genesis.hash()]);
    }

    #[test]
    fn test_genesis_stays_first() {
        let genesis = block(1, None, 0);
        let mut prev = genesis.clone();
        for height in 2..40 {
            let next = block(height, Some(&prev), height * 31);
            assert_eq!(next.interlink.hashes[0], genesis.hash());
            assert!(next.is_interlink_successor_of(&prev));
            prev = next;
        }
    }

    #[test]
    fn test_superblock_replaces_lowest_entries() {
        let genesis = block(1, None, 0);
        let second = block(2, Some(&genesis), 0);

        // Find a third block of level >= 1 by varying the nonce.
        let mut nonce = 0;
        let third = loop {
            let candidate = block(3, Some(&second), nonce);
            if candidate.level() >= 1 {
                break candidate;
            }
            nonce += 1;
        };
        let level = third.level() as usize;
        let fourth_links = BlockInterlink::for_successor(&third);
        assert_eq!(fourth_links.hashes[0], genesis.hash());
        assert_eq!(
            fourth_links.hashes.iter().filter(|h| **h == third.hash()).count(),
            level
        );
    }
}
