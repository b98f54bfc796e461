//! Proof artifacts: interlink block chains, header chains, chain proofs and
//! transactions proofs.

use crate::{Block, BlockHeader, ChainResult, Hash, MerkleProof, Transaction};
use serde::{Deserialize, Serialize};

/// Sequence of (usually light) blocks, oldest first, where each block is an
/// interlink successor of the one before it.
///
/// The oldest block is the tail, the newest the head.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockChain {
    pub blocks: Vec<Block>,
}

impl BlockChain {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Oldest block.
    pub fn tail(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Newest block.
    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Structural verification: non-empty, every block commits to its
    /// interlink and every block is an interlink successor of its predecessor.
    pub fn verify(&self) -> bool {
        if self.blocks.is_empty() {
            return false;
        }
        if self
            .blocks
            .iter()
            .any(|block| block.verify_structure().is_err())
        {
            return false;
        }
        self.blocks
            .windows(2)
            .all(|pair| pair[1].is_interlink_successor_of(&pair[0]))
    }
}

/// Consecutive headers, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderChain {
    pub headers: Vec<BlockHeader>,
}

impl HeaderChain {
    pub fn new(headers: Vec<BlockHeader>) -> Self {
        Self { headers }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Newest header.
    pub fn head(&self) -> Option<&BlockHeader> {
        self.headers.last()
    }

    /// Whether every header is the immediate successor of the previous one.
    pub fn verify(&self) -> bool {
        self.headers
            .windows(2)
            .all(|pair| pair[1].is_immediate_successor_of(&pair[0]))
    }
}

/// Compact proof of a chain: an interlink prefix reaching from genesis to
/// the start of a dense suffix of headers ending at the claimed head.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainProof {
    /// Interlink-linked light blocks, starting at genesis.
    pub prefix: BlockChain,
    /// Dense trailing headers.
    pub suffix: HeaderChain,
}

impl ChainProof {
    pub fn new(prefix: BlockChain, suffix: HeaderChain) -> Self {
        Self { prefix, suffix }
    }

    /// Header of the proven head.
    pub fn head(&self) -> Option<&BlockHeader> {
        self.suffix
            .head()
            .or_else(|| self.prefix.head().map(|block| &block.header))
    }

    /// Hash of the proven head.
    pub fn head_hash(&self) -> Option<Hash> {
        self.head().map(BlockHeader::hash)
    }

    /// Height of the proven head.
    pub fn head_height(&self) -> u32 {
        self.head().map(|header| header.height).unwrap_or_default()
    }

    /// Whether any suffix header hashes to `hash`.
    pub fn suffix_contains(&self, hash: &Hash) -> bool {
        self.suffix.headers.iter().any(|header| &header.hash() == hash)
    }

    /// Structural verification of prefix, suffix and the seam between them.
    pub fn verify(&self) -> bool {
        if !self.prefix.verify() || !self.suffix.verify() {
            return false;
        }
        match (self.prefix.head(), self.suffix.headers.first()) {
            (Some(prefix_head), Some(first)) => {
                first.is_immediate_successor_of(&prefix_head.header)
                    || *first == prefix_head.header
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Transactions of one block together with a Merkle proof against its body root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionsProof {
    pub transactions: Vec<Transaction>,
    pub proof: MerkleProof,
}

impl TransactionsProof {
    pub fn new(transactions: Vec<Transaction>, proof: MerkleProof) -> Self {
        Self {
            transactions,
            proof,
        }
    }

    /// Body root implied by the proof.
    pub fn root(&self) -> ChainResult<Hash> {
        let leaves: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        self.proof.compute_root(&leaves)
    }
}
