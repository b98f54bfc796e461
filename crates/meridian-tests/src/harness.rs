//! Test harness for integration tests.
//!
//! Provides in-memory implementations of the collaborator traits and a
//! loopback that wires two light sync agents to each other without I/O.

use crate::generators::test_peer;
use meridian_chain::{
    AccountsProof, AccountsTreeChunk, AccountsTreeLeaf, Address, Block, BlockChain, BlockHeader,
    ChainProof, Hash, HeaderChain, MerkleProof, Transaction, TransactionReceipt,
    TransactionsProof,
};
use meridian_network::{GetBlocksDirection, Message, PeerInfo, Services, Subscription};
use meridian_sync::{
    AgentTimer, Blockchain, FullSyncAgent, LightSyncAgent, Mempool, PartialChain,
    PartialChainState, PushResult, SyncCommand, SyncConfig, SyncError, SyncResult,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Leaves per served accounts tree chunk.
pub const CHUNK_SIZE: usize = 4;

/// Headers in the suffix of a served chain proof.
pub const PROOF_SUFFIX_LEN: usize = 8;

/// Install a fmt subscriber once; honours `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Config with a small verification window so proof sync stays cheap.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        verification_window: 10,
        ..SyncConfig::default()
    }
}

/// Agent for `peer` over the given chain and mempool.
pub fn test_agent(
    chain: &MemoryChain,
    mempool: &MemoryMempool,
    peer: PeerInfo,
    config: SyncConfig,
) -> FullSyncAgent {
    FullSyncAgent::new(
        peer,
        config,
        Arc::new(chain.clone()),
        Arc::new(mempool.clone()),
    )
}

/// Messages among `commands`, in order.
pub fn sent_messages(commands: &[SyncCommand]) -> Vec<Message> {
    commands
        .iter()
        .filter_map(|command| match command {
            SyncCommand::SendToPeer { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Live chain
// ============================================================================

#[derive(Default)]
struct ChainState {
    blocks: HashMap<Hash, Block>,
    /// Main chain hashes; index is height - 1.
    main: Vec<Hash>,
    accounts: Vec<AccountsTreeLeaf>,
}

impl ChainState {
    fn head(&self) -> Option<&Block> {
        self.main.last().and_then(|hash| self.blocks.get(hash))
    }

    fn main_index(&self, hash: &Hash) -> Option<usize> {
        let block = self.blocks.get(hash)?;
        let index = block.height().checked_sub(1)? as usize;
        (self.main.get(index) == Some(hash)).then_some(index)
    }
}

struct ChainInner {
    state: RwLock<ChainState>,
    busy: AtomicBool,
    proof_window: u32,
    /// Stage transitions of every partial chain handed out, in order.
    partial_log: Mutex<Vec<PartialChainState>>,
    rejected_headers: RwLock<Vec<Hash>>,
    /// Newest proof headers a partial chain leaves out when committing.
    withheld_headers: AtomicUsize,
    /// Bumped to make every partial chain handed out so far report `Aborted`.
    partial_epoch: AtomicUsize,
}

/// In-memory live chain; clones share state.
#[derive(Clone)]
pub struct MemoryChain {
    inner: Arc<ChainInner>,
}

impl MemoryChain {
    /// Chain whose main chain is `blocks`, genesis first.
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self::with_proof_window(blocks, 10)
    }

    /// Chain whose partial chains prove `proof_window` trailing blocks.
    pub fn with_proof_window(blocks: &[Block], proof_window: u32) -> Self {
        let mut state = ChainState::default();
        for block in blocks {
            let hash = block.hash();
            state.main.push(hash);
            state.blocks.insert(hash, block.clone());
        }
        Self {
            inner: Arc::new(ChainInner {
                state: RwLock::new(state),
                busy: AtomicBool::new(false),
                proof_window,
                partial_log: Mutex::new(Vec::new()),
                rejected_headers: RwLock::new(Vec::new()),
                withheld_headers: AtomicUsize::new(0),
                partial_epoch: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<AccountsTreeLeaf>) {
        self.inner.state.write().accounts = accounts;
    }

    pub fn set_busy(&self, busy: bool) {
        self.inner.busy.store(busy, Ordering::SeqCst);
    }

    /// Make `verify_header` fail for `hash`.
    pub fn reject_header(&self, hash: Hash) {
        self.inner.rejected_headers.write().push(hash);
    }

    /// Make partial chains commit without their newest `count` proof headers.
    pub fn withhold_committed_headers(&self, count: usize) {
        self.inner.withheld_headers.store(count, Ordering::SeqCst);
    }

    /// Abort every partial chain handed out so far, as if the chain moved on.
    pub fn invalidate_partial_chains(&self) {
        self.inner.partial_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.state.read().blocks.contains_key(hash)
    }

    pub fn partial_log(&self) -> Vec<PartialChainState> {
        self.inner.partial_log.lock().clone()
    }

    /// Push a block the way a node would after receiving it from a peer.
    pub fn push(&self, block: Block) -> PushResult {
        let mut state = self.inner.state.write();
        let hash = block.hash();
        if state.blocks.contains_key(&hash) {
            return PushResult::Known;
        }
        let Some(prev) = state.blocks.get(&block.prev_hash()) else {
            return PushResult::Orphan;
        };
        if !block.is_immediate_successor_of(prev) || block.verify_structure().is_err() {
            return PushResult::Invalid;
        }

        let head_hash = state.main.last().copied();
        let height = block.height();
        state.blocks.insert(hash, block.clone());

        if head_hash == Some(block.prev_hash()) {
            state.main.push(hash);
            return PushResult::Extended;
        }
        if height as usize <= state.main.len() {
            return PushResult::Forked;
        }

        // Longer side chain: walk back to the main chain and switch over.
        let mut branch = vec![hash];
        let mut cursor = block.prev_hash();
        while state.main_index(&cursor).is_none() {
            branch.push(cursor);
            match state.blocks.get(&cursor) {
                Some(b) => cursor = b.prev_hash(),
                None => return PushResult::Forked,
            }
        }
        let fork_point = state.main_index(&cursor).unwrap_or(0);
        state.main.truncate(fork_point + 1);
        state.main.extend(branch.into_iter().rev());
        PushResult::Rebranched
    }

    fn replace(&self, main: Vec<Block>, accounts: Vec<AccountsTreeLeaf>) {
        let mut state = self.inner.state.write();
        state.main = main.iter().map(Block::hash).collect();
        for block in main {
            state.blocks.insert(block.hash(), block);
        }
        state.accounts = accounts;
    }

    fn block_at(&self, height: u32) -> Option<Block> {
        let state = self.inner.state.read();
        let index = height.checked_sub(1)? as usize;
        state.main.get(index).and_then(|h| state.blocks.get(h)).cloned()
    }

    fn log_transition(&self, next: PartialChainState) {
        self.inner.partial_log.lock().push(next);
    }
}

impl Blockchain for MemoryChain {
    fn head(&self) -> Block {
        let state = self.inner.state.read();
        match state.head() {
            Some(block) => block.clone(),
            None => crate::generators::genesis_block(Hash::default()),
        }
    }

    fn genesis_hash(&self) -> Hash {
        self.inner
            .state
            .read()
            .main
            .first()
            .copied()
            .unwrap_or_default()
    }

    fn get_block(&self, hash: &Hash, include_forks: bool, include_body: bool) -> Option<Block> {
        let state = self.inner.state.read();
        if !include_forks && state.main_index(hash).is_none() {
            return None;
        }
        let block = state.blocks.get(hash)?;
        Some(if include_body {
            block.clone()
        } else {
            block.to_light()
        })
    }

    fn get_block_at(&self, height: u32, include_body: bool) -> Option<Block> {
        let block = self.block_at(height)?;
        Some(if include_body { block } else { block.to_light() })
    }

    fn get_blocks_by_locator(
        &self,
        locators: &[Hash],
        max: u32,
        direction: GetBlocksDirection,
    ) -> Vec<Hash> {
        let state = self.inner.state.read();
        let start = locators
            .iter()
            .find_map(|hash| state.main_index(hash))
            .unwrap_or(0);
        let max = max as usize;
        match direction {
            GetBlocksDirection::Forward => state.main.iter().skip(start + 1).take(max).copied().collect(),
            GetBlocksDirection::Backward => state.main[..start].iter().rev().take(max).copied().collect(),
        }
    }

    fn get_chain_proof(&self) -> Option<ChainProof> {
        let state = self.inner.state.read();
        let blocks: Vec<&Block> = state.main.iter().filter_map(|h| state.blocks.get(h)).collect();
        if blocks.is_empty() {
            return None;
        }
        let split = blocks.len().saturating_sub(PROOF_SUFFIX_LEN).max(1);
        let prefix = BlockChain::new(blocks[..split].iter().map(|b| b.to_light()).collect());
        let suffix = HeaderChain::new(blocks[split..].iter().map(|b| b.header.clone()).collect());
        Some(ChainProof::new(prefix, suffix))
    }

    fn get_accounts_tree_chunk(
        &self,
        block_hash: &Hash,
        start_prefix: &[u8],
    ) -> Option<AccountsTreeChunk> {
        let state = self.inner.state.read();
        if state.main.last() != Some(block_hash) {
            return None;
        }
        AccountsTreeChunk::build(&state.accounts, start_prefix, CHUNK_SIZE)
    }

    fn get_accounts_proof(&self, block_hash: &Hash, addresses: &[Address]) -> Option<AccountsProof> {
        let state = self.inner.state.read();
        state.blocks.get(block_hash)?;
        Some(AccountsProof::build(&state.accounts, addresses))
    }

    fn get_block_proof(&self, block_to_prove: &Block, known_block: &Block) -> Option<BlockChain> {
        let target = block_to_prove.hash();
        let mut path = Vec::new();
        let mut cursor = known_block.prev_hash();
        loop {
            let block = self.get_block(&cursor, false, false)?;
            let reached = cursor == target;
            cursor = block.prev_hash();
            path.push(block);
            if reached {
                break;
            }
            if path.len() > 10_000 {
                return None;
            }
        }
        path.reverse();
        Some(BlockChain::new(path))
    }

    fn get_transactions_proof(
        &self,
        block_hash: &Hash,
        addresses: &[Address],
    ) -> Option<TransactionsProof> {
        let block = self.get_block(block_hash, false, true)?;
        let body = block.body?;
        let transactions: Vec<Transaction> = body
            .transactions
            .iter()
            .filter(|tx| addresses.iter().any(|a| tx.involves(a)))
            .cloned()
            .collect();
        let proven: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
        let proof = MerkleProof::compute(&body.leaves(), &proven);
        Some(TransactionsProof::new(transactions, proof))
    }

    fn get_transaction_receipts(&self, address: &Address, limit: usize) -> Vec<TransactionReceipt> {
        let state = self.inner.state.read();
        state
            .main
            .iter()
            .filter_map(|h| state.blocks.get(h))
            .flat_map(|block| {
                let block_hash = block.hash();
                let block_height = block.height();
                block
                    .body
                    .iter()
                    .flat_map(|body| body.transactions.iter())
                    .filter(|tx| tx.involves(address))
                    .map(move |tx| TransactionReceipt {
                        transaction_hash: tx.hash(),
                        block_hash,
                        block_height,
                    })
                    .collect::<Vec<_>>()
            })
            .take(limit)
            .collect()
    }

    fn verify_header(&self, header: &BlockHeader) -> bool {
        !self.inner.rejected_headers.read().contains(&header.hash())
    }

    fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    fn partial_chain(&self) -> Box<dyn PartialChain> {
        self.log_transition(PartialChainState::ProveChain);
        Box::new(MemoryPartialChain::new(self.clone(), self.inner.proof_window))
    }
}

// ============================================================================
// Partial chain
// ============================================================================

/// Partial chain that commits into a [`MemoryChain`].
pub struct MemoryPartialChain {
    live: MemoryChain,
    epoch: usize,
    state: PartialChainState,
    window: u32,
    prefix: Vec<Block>,
    headers: Vec<BlockHeader>,
    accounts: Vec<AccountsTreeLeaf>,
    /// Trailing blocks, newest first.
    blocks: Vec<Block>,
}

impl MemoryPartialChain {
    pub fn new(live: MemoryChain, window: u32) -> Self {
        let epoch = live.inner.partial_epoch.load(Ordering::SeqCst);
        Self {
            live,
            epoch,
            state: PartialChainState::ProveChain,
            window,
            prefix: Vec::new(),
            headers: Vec::new(),
            accounts: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn advance(&mut self, next: PartialChainState) {
        assert!(
            self.state.can_advance_to(next),
            "illegal partial chain transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.live.log_transition(next);
    }

    fn head_header(&self) -> Option<&BlockHeader> {
        self.headers
            .last()
            .or_else(|| self.prefix.last().map(|b| &b.header))
    }

    fn blocks_total(&self) -> u32 {
        let height = self.head_header().map(|h| h.height).unwrap_or(1);
        self.window.min(height.saturating_sub(1))
    }

    fn expected_block(&self) -> Option<Hash> {
        match self.blocks.last() {
            Some(block) => Some(block.prev_hash()),
            None => self.head_header().map(|h| h.prev_hash),
        }
    }
}

impl PartialChain for MemoryPartialChain {
    fn state(&self) -> PartialChainState {
        if self.live.inner.partial_epoch.load(Ordering::SeqCst) != self.epoch {
            return PartialChainState::Aborted;
        }
        self.state
    }

    fn head_hash(&self) -> Hash {
        self.head_header().map(BlockHeader::hash).unwrap_or_default()
    }

    fn height(&self) -> u32 {
        self.head_header().map(|h| h.height).unwrap_or(0)
    }

    fn get_header(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers
            .iter()
            .chain(self.prefix.iter().map(|b| &b.header))
            .find(|h| &h.hash() == hash)
            .cloned()
    }

    fn push_proof(&mut self, proof: ChainProof) -> SyncResult<()> {
        if self.state != PartialChainState::ProveChain {
            return Err(SyncError::InvalidData("not proving chain".into()));
        }
        if !proof.verify() {
            return Err(SyncError::ProofRejected("chain proof does not verify".into()));
        }
        self.prefix = proof.prefix.blocks;
        self.headers = proof.suffix.headers;
        self.advance(PartialChainState::ProveAccountsTree);
        Ok(())
    }

    fn push_accounts_tree_chunk(&mut self, chunk: AccountsTreeChunk) -> SyncResult<()> {
        if self.state != PartialChainState::ProveAccountsTree {
            return Err(SyncError::InvalidData("not proving accounts".into()));
        }
        self.accounts.extend(chunk.leaves);
        let expected = self.head_header().map(|h| h.accounts_hash);
        if Some(AccountsTreeLeaf::root_of(&self.accounts)) == expected {
            self.advance(PartialChainState::ProveBlocks);
            if self.blocks_total() == 0 {
                self.advance(PartialChainState::Complete);
            }
        }
        Ok(())
    }

    fn missing_accounts_prefix(&self) -> Vec<u8> {
        self.accounts
            .last()
            .map(|leaf| leaf.prefix.clone())
            .unwrap_or_default()
    }

    fn block_locators(&self) -> Vec<Hash> {
        match self.blocks.last() {
            Some(block) => vec![block.hash()],
            None => vec![self.head_hash()],
        }
    }

    fn num_blocks_needed(&self) -> u32 {
        self.blocks_total().saturating_sub(self.blocks.len() as u32)
    }

    fn push_block(&mut self, block: Block) -> PushResult {
        if self.state != PartialChainState::ProveBlocks {
            return PushResult::Invalid;
        }
        let hash = block.hash();
        if self.blocks.iter().any(|b| b.hash() == hash) {
            return PushResult::Known;
        }
        if self.expected_block() != Some(hash) {
            return PushResult::Orphan;
        }
        self.blocks.push(block);
        if self.num_blocks_needed() == 0 {
            self.advance(PartialChainState::Complete);
        }
        PushResult::Extended
    }

    fn commit(&mut self) -> SyncResult<()> {
        if self.state != PartialChainState::Complete {
            return Err(SyncError::InvalidData("partial chain incomplete".into()));
        }
        let full: HashMap<Hash, Block> = self.blocks.iter().map(|b| (b.hash(), b.clone())).collect();
        let mut main: Vec<Block> = self.prefix.clone();
        let prefix_head = main.last().map(Block::hash);
        let withheld = self.live.inner.withheld_headers.load(Ordering::SeqCst);
        let committed = self.headers.len().saturating_sub(withheld);
        for header in &self.headers[..committed] {
            let hash = header.hash();
            if Some(hash) == prefix_head {
                continue;
            }
            let block = full.get(&hash).cloned().unwrap_or_else(|| {
                Block::new(header.clone(), Default::default(), None)
            });
            main.push(block);
        }
        for block in main.iter_mut() {
            if let Some(full_block) = full.get(&block.hash()) {
                *block = full_block.clone();
            }
        }
        self.live.replace(main, std::mem::take(&mut self.accounts));
        Ok(())
    }

    fn abort(&mut self) {
        if self.state != PartialChainState::Aborted {
            self.advance(PartialChainState::Aborted);
        }
    }
}

// ============================================================================
// Mempool
// ============================================================================

/// In-memory mempool; clones share state.
#[derive(Clone, Default)]
pub struct MemoryMempool {
    transactions: Arc<RwLock<Vec<Transaction>>>,
}

impl MemoryMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, transaction: Transaction) -> bool {
        let mut txs = self.transactions.write();
        if txs.iter().any(|tx| tx == &transaction) {
            return false;
        }
        txs.push(transaction);
        true
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mempool for MemoryMempool {
    fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.transactions
            .read()
            .iter()
            .find(|tx| &tx.hash() == hash)
            .cloned()
    }

    fn transactions(&self, subscription: &Subscription, max: usize) -> Vec<Transaction> {
        self.transactions
            .read()
            .iter()
            .filter(|tx| subscription.matches_transaction(tx))
            .take(max)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Loopback
// ============================================================================

/// One side of a [`Loopback`].
pub struct TestNode {
    pub agent: LightSyncAgent,
    pub chain: MemoryChain,
    pub mempool: MemoryMempool,
    /// Close and ban commands this side issued.
    pub closures: Vec<SyncCommand>,
    /// Number of `PeerSynced` commands issued.
    pub synced_count: usize,
    /// Every message this side sent, in order.
    pub sent: Vec<Message>,
}

impl TestNode {
    /// Node with `chain` talking to a peer whose head is `peer_head`.
    pub fn new(seed: u8, chain: MemoryChain, peer_head: Hash, config: SyncConfig) -> Self {
        let mempool = MemoryMempool::new();
        let peer = test_peer(seed, Services::FULL, peer_head);
        let agent = LightSyncAgent::new(
            peer,
            config,
            Arc::new(chain.clone()),
            Arc::new(mempool.clone()),
        );
        Self {
            agent,
            chain,
            mempool,
            closures: Vec::new(),
            synced_count: 0,
            sent: Vec::new(),
        }
    }

    pub fn is_banned(&self) -> bool {
        self.closures
            .iter()
            .any(|c| matches!(c, SyncCommand::BanPeer { .. }))
    }
}

/// Two agents wired back to back; `local` syncs from `remote`.
pub struct Loopback {
    pub local: TestNode,
    pub remote: TestNode,
}

impl Loopback {
    /// Pair two chains; each agent sees the other's head.
    pub fn new(local_chain: MemoryChain, remote_chain: MemoryChain, config: SyncConfig) -> Self {
        let local_head = local_chain.head_hash();
        let remote_head = remote_chain.head_hash();
        Self {
            local: TestNode::new(1, local_chain, remote_head, config.clone()),
            remote: TestNode::new(2, remote_chain, local_head, config),
        }
    }

    pub fn start(&mut self) {
        self.remote.agent.start();
        self.local.agent.start();
        self.settle();
    }

    /// Deliver commands until both sides are quiet, firing get-data throttles
    /// instead of waiting for them.
    pub fn settle(&mut self) {
        for _ in 0..100_000 {
            if self.pump_once() {
                continue;
            }
            let mut fired = false;
            for node in [&mut self.local, &mut self.remote] {
                if node.agent.agent().timers().exists(AgentTimer::GetDataThrottle) {
                    node.agent.on_timer(AgentTimer::GetDataThrottle);
                    fired = true;
                }
            }
            if !fired {
                return;
            }
        }
        panic!("loopback did not settle");
    }

    /// Deliver one round of commands; false if there were none.
    pub fn pump_once(&mut self) -> bool {
        let from_local = self.local.agent.take_commands();
        let from_remote = self.remote.agent.take_commands();
        if from_local.is_empty() && from_remote.is_empty() {
            return false;
        }
        for command in from_local {
            apply(&mut self.local, &mut self.remote, command);
        }
        for command in from_remote {
            apply(&mut self.remote, &mut self.local, command);
        }
        true
    }
}

fn apply(from: &mut TestNode, to: &mut TestNode, command: SyncCommand) {
    match command {
        SyncCommand::SendToPeer { message, .. } => {
            from.sent.push(message.clone());
            if !from.agent.is_closed() {
                to.agent.handle_message(message);
            }
        }
        SyncCommand::ClosePeer { .. } | SyncCommand::BanPeer { .. } => {
            from.closures.push(command);
            to.agent.shutdown();
        }
        SyncCommand::PushBlock { block, .. } => {
            let hash = block.hash();
            let result = from.chain.push(block);
            from.agent.on_block_processed(hash, result);
        }
        SyncCommand::PushTransaction { transaction, .. } => {
            let hash = transaction.hash();
            let accepted = from.mempool.insert(transaction);
            from.agent.on_transaction_processed(hash, accepted);
        }
        SyncCommand::PeerSynced { .. } => from.synced_count += 1,
    }
}
