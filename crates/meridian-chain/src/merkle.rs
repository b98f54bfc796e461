//! Merkle roots and compact multi-leaf proofs.
//!
//! Leaves are digests. The tree splits a list at `ceil(len / 2)`; an empty
//! list hashes to the digest of the empty string and a single leaf is its
//! own root. A proof is a postfix program: `ConsumeInput` pushes the next
//! proven leaf, `ConsumeProof` pushes the next sibling digest carried in the
//! proof and `Hash` replaces the top two stack entries with their parent.

use crate::{ChainError, ChainResult, Hash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Merkle root of an ordered list of leaf digests.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::digest(&[]),
        1 => leaves[0],
        len => {
            let mid = len.div_ceil(2);
            let left = merkle_root(&leaves[..mid]);
            let right = merkle_root(&leaves[mid..]);
            Hash::combine(&left, &right)
        }
    }
}

/// Single step of proof evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerkleOperation {
    ConsumeProof,
    ConsumeInput,
    Hash,
}

/// Proof that a subset of leaves belongs to a tree with a given root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling digests, consumed in order.
    pub nodes: Vec<Hash>,
    /// Evaluation program.
    pub operations: Vec<MerkleOperation>,
}

struct Subtree {
    contains_leaf: bool,
    root: Hash,
}

impl MerkleProof {
    /// Build a proof that every leaf in `to_prove` is part of `leaves`.
    ///
    /// Proven leaves must later be supplied to [`MerkleProof::compute_root`]
    /// in the order they appear in `leaves`.
    pub fn compute(leaves: &[Hash], to_prove: &[Hash]) -> Self {
        let wanted: HashSet<Hash> = to_prove.iter().copied().collect();
        let mut proof = Self::default();
        let subtree = proof.build(leaves, &wanted);
        if !subtree.contains_leaf {
            proof.nodes.push(subtree.root);
            proof.operations.push(MerkleOperation::ConsumeProof);
        }
        proof
    }

    fn build(&mut self, leaves: &[Hash], wanted: &HashSet<Hash>) -> Subtree {
        match leaves.len() {
            0 => Subtree {
                contains_leaf: false,
                root: Hash::digest(&[]),
            },
            1 => {
                let contains_leaf = wanted.contains(&leaves[0]);
                if contains_leaf {
                    self.operations.push(MerkleOperation::ConsumeInput);
                }
                Subtree {
                    contains_leaf,
                    root: leaves[0],
                }
            }
            len => {
                let mid = len.div_ceil(2);
                let mark = (self.nodes.len(), self.operations.len());

                let left = self.build(&leaves[..mid], wanted);
                let right = self.build(&leaves[mid..], wanted);
                let root = Hash::combine(&left.root, &right.root);

                if !left.contains_leaf && !right.contains_leaf {
                    // Neither side is proven; the caller only needs our root.
                    self.nodes.truncate(mark.0);
                    self.operations.truncate(mark.1);
                    return Subtree {
                        contains_leaf: false,
                        root,
                    };
                }

                // Rewrite the program so unproven halves become proof nodes.
                let mut operations = self.operations.split_off(mark.1);
                let mut nodes = self.nodes.split_off(mark.0);
                if !left.contains_leaf {
                    nodes.insert(0, left.root);
                    operations.insert(0, MerkleOperation::ConsumeProof);
                }
                if !right.contains_leaf {
                    nodes.push(right.root);
                    operations.push(MerkleOperation::ConsumeProof);
                }
                operations.push(MerkleOperation::Hash);
                self.nodes.extend(nodes);
                self.operations.extend(operations);

                Subtree {
                    contains_leaf: true,
                    root,
                }
            }
        }
    }

    /// Evaluate the proof over the proven leaves and return the root.
    pub fn compute_root(&self, leaves: &[Hash]) -> ChainResult<Hash> {
        let mut stack: Vec<Hash> = Vec::with_capacity(self.operations.len());
        let mut inputs = leaves.iter();
        let mut nodes = self.nodes.iter();

        for operation in &self.operations {
            match operation {
                MerkleOperation::ConsumeProof => {
                    let node = nodes.next().ok_or_else(|| {
                        ChainError::InvalidMerkleProof("ran out of proof nodes".into())
                    })?;
                    stack.push(*node);
                }
                MerkleOperation::ConsumeInput => {
                    let leaf = inputs.next().ok_or_else(|| {
                        ChainError::InvalidMerkleProof("ran out of leaves".into())
                    })?;
                    stack.push(*leaf);
                }
                MerkleOperation::Hash => {
                    let (right, left) = match (stack.pop(), stack.pop()) {
                        (Some(right), Some(left)) => (right, left),
                        _ => {
                            return Err(ChainError::InvalidMerkleProof(
                                "stack underflow".into(),
                            ))
                        }
                    };
                    stack.push(Hash::combine(&left, &right));
                }
            }
        }

        if inputs.next().is_some() || nodes.next().is_some() {
            return Err(ChainError::InvalidMerkleProof(
                "unconsumed leaves or nodes".into(),
            ));
        }
        match stack.as_slice() {
            [root] => Ok(*root),
            _ => Err(ChainError::InvalidMerkleProof(format!(
                "expected a single root, stack has {} entries",
                stack.len()
            ))),
        }
    }

    /// Number of sibling digests carried.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the proof carries no sibling digests.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: u8) -> Vec<Hash> {
        (0..n).map(|i| Hash::digest(&[i])).collect()
    }

    #[test]
    fn test_root_of_small_trees() {
        assert_eq!(merkle_root(&[]), Hash::digest(&[]));
        let l = leaves(3);
        assert_eq!(merkle_root(&l[..1]), l[0]);
        assert_eq!(
            merkle_root(&l),
            Hash::combine(&Hash::combine(&l[0], &l[1]), &l[2])
        );
    }

    #[test]
    fn test_proof_for_subset() {
        let l = leaves(9);
        let root = merkle_root(&l);
        let proven = vec![l[1], l[4], l[8]];
        let proof = MerkleProof::compute(&l, &proven);
        assert_eq!(proof.compute_root(&proven), Ok(root));
    }

    #[test]
    fn test_proof_for_all_and_none() {
        let l = leaves(5);
        let root = merkle_root(&l);

        let all = MerkleProof::compute(&l, &l);
        assert!(all.is_empty());
        assert_eq!(all.compute_root(&l), Ok(root));

        let none = MerkleProof::compute(&l, &[]);
        assert_eq!(none.len(), 1);
        assert_eq!(none.compute_root(&[]), Ok(root));
    }

    #[test]
    fn test_wrong_leaf_changes_root() {
        let l = leaves(6);
        let root = merkle_root(&l);
        let proof = MerkleProof::compute(&l, &[l[2]]);
        assert_ne!(proof.compute_root(&[l[3]]), Ok(root));
    }

    #[test]
    fn test_malformed_programs_are_rejected() {
        let l = leaves(4);
        let proof = MerkleProof::compute(&l, &[l[0], l[3]]);
        assert!(proof.compute_root(&[l[0]]).is_err());
        assert!(proof.compute_root(&[l[0], l[3], l[1]]).is_err());

        let underflow = MerkleProof {
            nodes: vec![],
            operations: vec![MerkleOperation::Hash],
        };
        assert!(underflow.compute_root(&[]).is_err());
    }

    proptest! {
        #[test]
        fn proof_of_any_subset_reaches_root(
            count in 1u8..40,
            mask in prop::collection::vec(any::<bool>(), 40),
        ) {
            let l = leaves(count);
            let proven: Vec<Hash> = l
                .iter()
                .zip(&mask)
                .filter(|(_, keep)| **keep)
                .map(|(leaf, _)| *leaf)
                .collect();
            let proof = MerkleProof::compute(&l, &proven);
            prop_assert_eq!(proof.compute_root(&proven), Ok(merkle_root(&l)));
        }
    }
}
