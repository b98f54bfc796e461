//! Accounts tree leaves, chunks and proofs.
//!
//! The accounts tree itself is owned by the chain. On the wire it is seen
//! as an ordered list of leaves keyed by prefix; its root is the Merkle root
//! over the leaf digests in prefix order.

use crate::{merkle_root, Address, ChainResult, Hash, MerkleProof};
use serde::{Deserialize, Serialize};

/// Account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
}

/// A leaf of the accounts tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsTreeLeaf {
    /// Full key of the leaf (the account address bytes).
    pub prefix: Vec<u8>,
    pub account: Account,
}

impl AccountsTreeLeaf {
    pub fn new(address: Address, account: Account) -> Self {
        Self {
            prefix: address.as_bytes().to_vec(),
            account,
        }
    }

    /// Leaf digest.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(1 + self.prefix.len() + 8);
        buf.push(self.prefix.len() as u8);
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(&self.account.balance.to_be_bytes());
        Hash::digest(&buf)
    }

    /// Root of a complete, prefix-ordered leaf list.
    pub fn root_of(leaves: &[AccountsTreeLeaf]) -> Hash {
        let digests: Vec<Hash> = leaves.iter().map(AccountsTreeLeaf::hash).collect();
        merkle_root(&digests)
    }
}

fn strictly_ordered(leaves: &[AccountsTreeLeaf]) -> bool {
    leaves.windows(2).all(|pair| pair[0].prefix < pair[1].prefix)
}

/// Contiguous slice of the accounts tree with a proof against its root.
///
/// The end of the slice is implicit: the tail leaf is the last one covered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountsTreeChunk {
    pub leaves: Vec<AccountsTreeLeaf>,
    pub proof: MerkleProof,
}

impl AccountsTreeChunk {
    pub fn new(leaves: Vec<AccountsTreeLeaf>, proof: MerkleProof) -> Self {
        Self { leaves, proof }
    }

    /// Cut a chunk of at most `size` leaves strictly after `start_prefix`
    /// out of a complete, prefix-ordered leaf list.
    pub fn build(all: &[AccountsTreeLeaf], start_prefix: &[u8], size: usize) -> Option<Self> {
        let leaves: Vec<AccountsTreeLeaf> = all
            .iter()
            .filter(|leaf| leaf.prefix.as_slice() > start_prefix)
            .take(size)
            .cloned()
            .collect();
        if leaves.is_empty() {
            return None;
        }
        let digests: Vec<Hash> = all.iter().map(AccountsTreeLeaf::hash).collect();
        let proven: Vec<Hash> = leaves.iter().map(AccountsTreeLeaf::hash).collect();
        let proof = MerkleProof::compute(&digests, &proven);
        Some(Self::new(leaves, proof))
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Prefix of the first leaf.
    pub fn head_prefix(&self) -> Option<&[u8]> {
        self.leaves.first().map(|leaf| leaf.prefix.as_slice())
    }

    /// Prefix of the last leaf.
    pub fn tail_prefix(&self) -> Option<&[u8]> {
        self.leaves.last().map(|leaf| leaf.prefix.as_slice())
    }

    /// Well-formedness: non-empty and strictly ordered by prefix.
    pub fn verify(&self) -> bool {
        !self.leaves.is_empty() && strictly_ordered(&self.leaves)
    }

    /// Tree root implied by the chunk's proof.
    pub fn root(&self) -> ChainResult<Hash> {
        let digests: Vec<Hash> = self.leaves.iter().map(AccountsTreeLeaf::hash).collect();
        self.proof.compute_root(&digests)
    }
}

/// Proof of a set of accounts against an accounts root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountsProof {
    pub leaves: Vec<AccountsTreeLeaf>,
    pub proof: MerkleProof,
}

impl AccountsProof {
    /// Prove the leaves of `addresses` that exist in `all`.
    pub fn build(all: &[AccountsTreeLeaf], addresses: &[Address]) -> Self {
        let leaves: Vec<AccountsTreeLeaf> = all
            .iter()
            .filter(|leaf| {
                addresses
                    .iter()
                    .any(|address| leaf.prefix.as_slice() == address.as_bytes())
            })
            .cloned()
            .collect();
        let digests: Vec<Hash> = all.iter().map(AccountsTreeLeaf::hash).collect();
        let proven: Vec<Hash> = leaves.iter().map(AccountsTreeLeaf::hash).collect();
        let proof = MerkleProof::compute(&digests, &proven);
        Self { leaves, proof }
    }

    pub fn verify(&self) -> bool {
        strictly_ordered(&self.leaves)
    }

    pub fn root(&self) -> ChainResult<Hash> {
        let digests: Vec<Hash> = self.leaves.iter().map(AccountsTreeLeaf::hash).collect();
        self.proof.compute_root(&digests)
    }

    /// Account of `address`, if proven.
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.leaves
            .iter()
            .find(|leaf| leaf.prefix.as_slice() == address.as_bytes())
            .map(|leaf| leaf.account)
    }
}
