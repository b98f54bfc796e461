//! # meridian-chain
//!
//! Chain primitives exchanged by the peer synchronization protocol.
//!
//! This crate provides:
//! - Blake2b-256 hashes and addresses
//! - Block headers, interlinks, bodies and transactions
//! - Compact Merkle proofs over ordered leaf sets
//! - Interlink-based block chains, header chains and chain proofs
//! - Accounts tree chunks and accounts proofs
//!
//! Block validation rules, proof-of-work and the accounts tree itself live
//! behind the collaborator traits of `meridian-sync`; the types here only
//! carry enough structure for the protocol to check what it receives.

mod accounts;
pub mod block;
mod error;
mod hash;
pub mod interlink;
pub mod merkle;
pub mod policy;
mod proof;
mod transaction;

pub use accounts::{Account, AccountsProof, AccountsTreeChunk, AccountsTreeLeaf};
pub use block::{Block, BlockBody, BlockHeader};
pub use error::{ChainError, ChainResult};
pub use hash::{Address, Hash};
pub use interlink::BlockInterlink;
pub use merkle::{merkle_root, MerkleOperation, MerkleProof};
pub use proof::{BlockChain, ChainProof, HeaderChain, TransactionsProof};
pub use transaction::{Transaction, TransactionReceipt};
