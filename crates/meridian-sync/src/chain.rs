//! Collaborator interfaces the sync core depends on.
//!
//! The live chain and mempool are shared by every peer session and must
//! serialize their own mutation. A `PartialChain` is created per proof-mode
//! sync attempt and owned by exactly one session.

use crate::SyncResult;
use meridian_chain::{
    AccountsProof, AccountsTreeChunk, Address, Block, BlockChain, BlockHeader, ChainProof, Hash,
    Transaction, TransactionReceipt, TransactionsProof,
};
use meridian_network::{GetBlocksDirection, Subscription};
use std::fmt;

/// Outcome of pushing a block into a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// Block failed validation.
    Invalid,
    /// Block was already stored.
    Known,
    /// Block extended the main chain.
    Extended,
    /// Block extended a fork that became the main chain.
    Rebranched,
    /// Block extended a side chain.
    Forked,
    /// Predecessor unknown.
    Orphan,
}

impl PushResult {
    /// Whether the block was stored.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Known | Self::Extended | Self::Rebranched | Self::Forked)
    }
}

/// Stage of a partial chain under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartialChainState {
    ProveChain,
    ProveAccountsTree,
    ProveBlocks,
    Complete,
    Aborted,
}

impl PartialChainState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: PartialChainState) -> bool {
        use PartialChainState::*;
        matches!(
            (self, next),
            (ProveChain, ProveAccountsTree)
                | (ProveAccountsTree, ProveBlocks)
                | (ProveBlocks, Complete)
                | (ProveChain | ProveAccountsTree | ProveBlocks | Complete, Aborted)
        )
    }
}

impl fmt::Display for PartialChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProveChain => "prove-chain",
            Self::ProveAccountsTree => "prove-accounts-tree",
            Self::ProveBlocks => "prove-blocks",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Events published by the live chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// Main chain head moved.
    HeadChanged { hash: Hash, height: u32 },
    /// Chain finished its pending work and accepts new blocks.
    Ready,
}

/// The live chain shared by all peer sessions.
pub trait Blockchain: Send + Sync {
    fn head(&self) -> Block;

    fn head_hash(&self) -> Hash {
        self.head().hash()
    }

    fn height(&self) -> u32 {
        self.head().height()
    }

    fn genesis_hash(&self) -> Hash;

    /// Look up a block, optionally searching side chains.
    fn get_block(&self, hash: &Hash, include_forks: bool, include_body: bool) -> Option<Block>;

    /// Main chain block at `height`.
    fn get_block_at(&self, height: u32, include_body: bool) -> Option<Block>;

    /// Hashes of main chain blocks after (or before) the first known locator.
    fn get_blocks_by_locator(
        &self,
        locators: &[Hash],
        max: u32,
        direction: GetBlocksDirection,
    ) -> Vec<Hash>;

    fn get_chain_proof(&self) -> Option<ChainProof>;

    /// Chunk of the accounts tree at `block_hash` following `start_prefix`.
    fn get_accounts_tree_chunk(
        &self,
        block_hash: &Hash,
        start_prefix: &[u8],
    ) -> Option<AccountsTreeChunk>;

    fn get_accounts_proof(&self, block_hash: &Hash, addresses: &[Address])
        -> Option<AccountsProof>;

    /// Interlink path from `known_block` back to `block_to_prove`.
    fn get_block_proof(&self, block_to_prove: &Block, known_block: &Block) -> Option<BlockChain>;

    fn get_transactions_proof(
        &self,
        block_hash: &Hash,
        addresses: &[Address],
    ) -> Option<TransactionsProof>;

    fn get_transaction_receipts(&self, address: &Address, limit: usize)
        -> Vec<TransactionReceipt>;

    /// Point-in-time header checks (clock drift, proof of work).
    fn verify_header(&self, header: &BlockHeader) -> bool;

    /// Whether the chain is still processing earlier pushes.
    fn is_busy(&self) -> bool;

    /// Fresh partial chain for a proof-mode sync attempt.
    fn partial_chain(&self) -> Box<dyn PartialChain>;
}

/// Pending transactions shared by all peer sessions.
pub trait Mempool: Send + Sync {
    fn get_transaction(&self, hash: &Hash) -> Option<Transaction>;

    /// Up to `max` transactions matching `subscription`.
    fn transactions(&self, subscription: &Subscription, max: usize) -> Vec<Transaction>;
}

/// A chain being built from proofs rather than full history.
///
/// Verification of chain proofs and accounts tree chunks happens here; the
/// light sync state machine only orchestrates requests against it.
pub trait PartialChain: Send {
    fn state(&self) -> PartialChainState;

    fn head_hash(&self) -> Hash;

    fn height(&self) -> u32;

    /// Header known to this partial chain, including the proof suffix.
    fn get_header(&self, hash: &Hash) -> Option<BlockHeader>;

    /// Verify and adopt a chain proof; advances to `ProveAccountsTree`.
    fn push_proof(&mut self, proof: ChainProof) -> SyncResult<()>;

    /// Merge a verified chunk; advances to `ProveBlocks` once the tree is complete.
    fn push_accounts_tree_chunk(&mut self, chunk: AccountsTreeChunk) -> SyncResult<()>;

    /// Prefix the next chunk should start after.
    fn missing_accounts_prefix(&self) -> Vec<u8>;

    /// Locators for the trailing block window.
    fn block_locators(&self) -> Vec<Hash>;

    /// Blocks still missing from the trailing window.
    fn num_blocks_needed(&self) -> u32;

    fn push_block(&mut self, block: Block) -> PushResult;

    /// Replace the live chain with this one.
    fn commit(&mut self) -> SyncResult<()>;

    /// Drop all partially applied state; moves to `Aborted`.
    fn abort(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_chain_transitions() {
        use PartialChainState::*;
        assert!(ProveChain.can_advance_to(ProveAccountsTree));
        assert!(ProveAccountsTree.can_advance_to(ProveBlocks));
        assert!(ProveBlocks.can_advance_to(Complete));
        assert!(ProveBlocks.can_advance_to(Aborted));
        assert!(!ProveChain.can_advance_to(ProveBlocks));
        assert!(!Aborted.can_advance_to(ProveChain));
        assert!(!Complete.can_advance_to(ProveChain));
    }

    #[test]
    fn test_push_result_accepted() {
        assert!(PushResult::Forked.is_accepted());
        assert!(!PushResult::Orphan.is_accepted());
        assert!(!PushResult::Invalid.is_accepted());
    }
}
