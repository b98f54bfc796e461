//! Block types.
//!
//! A block is a header, the interlink vector the header commits to and an
//! optional body. Blocks without a body ("light" blocks) are what chain
//! proofs and block proofs carry.

use crate::policy::{INTERLINK_LEVEL_MAX, TIMESTAMP_DRIFT_MAX};
use crate::{merkle_root, Address, BlockInterlink, ChainError, ChainResult, Hash, Transaction};
use serde::{Deserialize, Serialize};

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header version.
    pub version: u16,
    /// Hash of the parent block.
    pub prev_hash: Hash,
    /// Hash of this block's interlink vector.
    pub interlink_hash: Hash,
    /// Merkle root over the body leaves.
    pub body_hash: Hash,
    /// Root of the accounts tree after applying this block.
    pub accounts_hash: Hash,
    /// Compact difficulty target.
    pub n_bits: u32,
    /// Block height.
    pub height: u32,
    /// Unix timestamp in seconds.
    pub timestamp: u32,
    /// Mining nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Size of the canonical encoding.
    pub const SERIALIZED_SIZE: usize = 146;

    /// Canonical byte encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.interlink_hash.as_bytes());
        buf.extend_from_slice(self.body_hash.as_bytes());
        buf.extend_from_slice(self.accounts_hash.as_bytes());
        buf.extend_from_slice(&self.n_bits.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf
    }

    /// Header hash, which is also the block hash.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.serialize())
    }

    /// Whether this header directly follows `prev`.
    pub fn is_immediate_successor_of(&self, prev: &BlockHeader) -> bool {
        self.height == prev.height + 1
            && self.prev_hash == prev.hash()
            && self.timestamp >= prev.timestamp
    }

    /// Whether the timestamp is not too far ahead of `now` (unix seconds).
    pub fn is_timestamp_valid(&self, now: u64) -> bool {
        u64::from(self.timestamp) <= now + TIMESTAMP_DRIFT_MAX.as_secs()
    }
}

/// Block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Address receiving the block reward.
    pub miner: Address,
    /// Included transactions, in block order.
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    /// Create a body.
    pub fn new(miner: Address, transactions: Vec<Transaction>) -> Self {
        Self {
            miner,
            transactions,
        }
    }

    /// Merkle leaves: the miner address digest followed by the transaction hashes.
    pub fn leaves(&self) -> Vec<Hash> {
        let mut leaves = Vec::with_capacity(self.transactions.len() + 1);
        leaves.push(Hash::digest(self.miner.as_bytes()));
        leaves.extend(self.transactions.iter().map(Transaction::hash));
        leaves
    }

    /// Body root committed to by the header.
    pub fn hash(&self) -> Hash {
        merkle_root(&self.leaves())
    }
}

/// A block, with or without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Interlink vector.
    pub interlink: BlockInterlink,
    /// Body, absent for light blocks.
    pub body: Option<BlockBody>,
}

impl Block {
    /// Create a block.
    pub fn new(header: BlockHeader, interlink: BlockInterlink, body: Option<BlockBody>) -> Self {
        Self {
            header,
            interlink,
            body,
        }
    }

    /// Block hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Block height.
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Parent hash.
    pub fn prev_hash(&self) -> Hash {
        self.header.prev_hash
    }

    /// Whether the body is attached.
    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }

    /// Copy without the body.
    pub fn to_light(&self) -> Block {
        Block {
            header: self.header.clone(),
            interlink: self.interlink.clone(),
            body: None,
        }
    }

    /// Superblock level, derived from the hash.
    pub fn level(&self) -> u32 {
        self.hash().leading_zero_bits().min(INTERLINK_LEVEL_MAX)
    }

    /// Whether this block directly follows `prev`.
    pub fn is_immediate_successor_of(&self, prev: &Block) -> bool {
        self.header.is_immediate_successor_of(&prev.header)
    }

    /// Whether this block references `prev` through its parent hash or interlink.
    pub fn is_interlink_successor_of(&self, prev: &Block) -> bool {
        if self.height() <= prev.height() || self.header.timestamp < prev.header.timestamp {
            return false;
        }
        if self.header.interlink_hash != self.interlink.hash() {
            return false;
        }
        let prev_hash = prev.hash();
        self.header.prev_hash == prev_hash || self.interlink.contains(&prev_hash)
    }

    /// Check that the header commits to the attached interlink and body.
    pub fn verify_structure(&self) -> ChainResult<()> {
        if self.header.interlink_hash != self.interlink.hash() {
            return Err(ChainError::InvalidBlock(format!(
                "interlink hash mismatch in block {}",
                self.hash()
            )));
        }
        if let Some(body) = &self.body {
            if self.header.body_hash != body.hash() {
                return Err(ChainError::InvalidBlock(format!(
                    "body hash mismatch in block {}",
                    self.hash()
                )));
            }
        }
        Ok(())
    }
}
