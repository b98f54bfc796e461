//! Light chain synchronization with one peer.
//!
//! ```text
//! Idle ──peer head unknown──> ChoosingMode ──gap <= window──> Catchup ──head known──> Synced
//!                                   │                            │ deep fork
//!                                   └────────gap > window──────> Proof ──committed──> Synced
//! ```
//!
//! In proof mode a fresh [`PartialChain`] is driven through its stages:
//! chain proof, accounts tree chunks, trailing blocks, commit. Any rejected
//! response aborts it and the next attempt starts over with a new one.

use crate::agent::{AgentEvent, AgentTimer, FullSyncAgent};
use crate::chain::{Blockchain, Mempool, PartialChain, PartialChainState, PushResult};
use crate::locator::chain_locators;
use crate::protocol::{SessionEvent, SyncCommand};
use crate::SyncConfig;
use meridian_chain::{AccountsTreeChunk, Block, BlockHeader, ChainProof, Hash};
use meridian_network::{CloseReason, GetBlocksDirection, InvVector, Message, PeerInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Sync progress with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    /// Waiting for the header of the peer's head.
    ChoosingMode,
    /// Downloading blocks onto the live chain.
    Catchup,
    /// Building a partial chain from proofs.
    Proof,
    Synced,
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::ChoosingMode | Self::Catchup | Self::Proof)
    }
}

#[derive(Debug, Clone)]
struct ChunkRequest {
    block_hash: Hash,
    start_prefix: Vec<u8>,
}

/// Drives a [`FullSyncAgent`] until our chain has caught up with the peer.
pub struct LightSyncAgent {
    agent: FullSyncAgent,
    state: SyncState,
    /// Head the peer claimed when it connected.
    sync_target: Hash,
    partial_chain: Option<Box<dyn PartialChain>>,
    header_request: Option<Hash>,
    chain_proof_requested: bool,
    chunk_request: Option<ChunkRequest>,
    waiting_for_ready: bool,
    /// Weighted count of failed sync steps.
    failed_syncs: u32,
    /// Blocks the partial chain still needed at the previous proof-blocks request.
    last_blocks_needed: Option<u32>,
    /// Blocks that extended our chain since the last get-blocks; `None` before the first.
    blocks_extending: Option<u32>,
    blocks_forking: u32,
    fork_head: Option<Block>,
    /// Whether the peer's blocks connect to our main chain.
    on_main_chain: bool,
    orphaned_blocks: Vec<Block>,
    /// Blocks pushed to the live chain awaiting their result.
    pending_blocks: HashMap<Hash, Block>,
}

impl LightSyncAgent {
    pub fn new(
        peer: PeerInfo,
        config: SyncConfig,
        chain: Arc<dyn Blockchain>,
        mempool: Arc<dyn Mempool>,
    ) -> Self {
        let sync_target = peer.head_hash;
        Self {
            agent: FullSyncAgent::new(peer, config, chain, mempool),
            state: SyncState::Idle,
            sync_target,
            partial_chain: None,
            header_request: None,
            chain_proof_requested: false,
            chunk_request: None,
            waiting_for_ready: false,
            failed_syncs: 0,
            last_blocks_needed: None,
            blocks_extending: None,
            blocks_forking: 0,
            fork_head: None,
            on_main_chain: false,
            orphaned_blocks: Vec::new(),
            pending_blocks: HashMap::new(),
        }
    }

    // ==================== Accessors ====================

    pub fn agent(&self) -> &FullSyncAgent {
        &self.agent
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn failed_syncs(&self) -> u32 {
        self.failed_syncs
    }

    pub fn partial_chain_state(&self) -> Option<PartialChainState> {
        self.partial_chain.as_ref().map(|p| p.state())
    }

    pub fn is_closed(&self) -> bool {
        self.agent.is_closed()
    }

    pub fn is_synced(&self) -> bool {
        self.agent.is_synced()
    }

    pub fn orphaned_block_count(&self) -> usize {
        self.orphaned_blocks.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.agent.timers().next_deadline()
    }

    pub fn take_commands(&mut self) -> Vec<SyncCommand> {
        self.agent.take_commands()
    }

    fn chain(&self) -> Arc<dyn Blockchain> {
        Arc::clone(self.agent.chain())
    }

    fn config(&self) -> &SyncConfig {
        self.agent.config()
    }

    // ==================== Entry points ====================

    /// Subscribe and start syncing.
    pub fn start(&mut self) {
        self.agent.start();
        self.sync_blockchain();
        self.after_step();
    }

    /// Dispatch an inbound session event.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => self.handle_message(message),
            SessionEvent::BlockProcessed { hash, result } => self.on_block_processed(hash, result),
            SessionEvent::TransactionProcessed { hash, accepted } => {
                self.on_transaction_processed(hash, accepted)
            }
            SessionEvent::RelayBlock { block, reply } => {
                let relayed = self.relay_block(&block);
                if let Some(reply) = reply {
                    let _ = reply.send(relayed);
                }
            }
            SessionEvent::RelayTransaction { transaction, reply } => {
                let relayed = self.relay_transaction(&transaction);
                if let Some(reply) = reply {
                    let _ = reply.send(relayed);
                }
            }
            SessionEvent::RemoveTransaction { hash } => self.agent.remove_transaction(&hash),
            SessionEvent::Subscribe(subscription) => {
                self.agent.subscribe(subscription);
                self.after_step();
            }
            SessionEvent::RequestBlockProof {
                block_hash_to_prove,
                known_block,
                reply,
            } => {
                self.agent
                    .request_block_proof(block_hash_to_prove, known_block, reply);
                self.after_step();
            }
            SessionEvent::RequestTransactionsProof {
                block,
                addresses,
                reply,
            } => {
                self.agent
                    .request_transactions_proof(block, addresses, reply);
                self.after_step();
            }
            SessionEvent::RequestTransactionReceipts { address, reply } => {
                self.agent.request_transaction_receipts(address, reply);
                self.after_step();
            }
            SessionEvent::RequestAccounts {
                block,
                addresses,
                reply,
            } => {
                self.agent.request_accounts(block, addresses, reply);
                self.after_step();
            }
            SessionEvent::Close(reason) => {
                self.agent.close(reason);
                self.after_step();
            }
        }
    }

    /// Dispatch a message from the peer.
    pub fn handle_message(&mut self, message: Message) {
        if self.agent.is_closed() {
            return;
        }
        match message {
            Message::Header(header) => self.on_header(*header),
            Message::ChainProof(proof) => self.on_chain_proof(*proof),
            Message::AccountsTreeChunk { block_hash, chunk } => {
                self.on_accounts_tree_chunk(block_hash, chunk)
            }
            other => self.agent.handle_message(other),
        }
        self.after_step();
    }

    pub fn relay_block(&mut self, block: &Block) -> bool {
        let relayed = self.agent.relay_block(block);
        self.after_step();
        relayed
    }

    pub fn relay_transaction(&mut self, transaction: &meridian_chain::Transaction) -> bool {
        let relayed = self.agent.relay_transaction(transaction);
        self.after_step();
        relayed
    }

    /// The live chain finished a block we pushed.
    pub fn on_block_processed(&mut self, hash: Hash, result: PushResult) {
        let Some(block) = self.pending_blocks.remove(&hash) else {
            debug!(peer = %self.peer_id(), block = %hash, "Result for untracked block");
            return;
        };
        self.on_push_result(&block, result);
        self.agent.on_object_processed(InvVector::block(hash));
        self.after_step();
    }

    pub fn on_transaction_processed(&mut self, hash: Hash, accepted: bool) {
        self.agent.on_transaction_processed(hash, accepted);
        self.after_step();
    }

    /// The live chain finished its pending work.
    pub fn on_chain_ready(&mut self) {
        if !self.waiting_for_ready {
            return;
        }
        self.waiting_for_ready = false;
        self.agent.timers_mut().clear(AgentTimer::SyncRetry);
        self.sync_blockchain();
        self.after_step();
    }

    /// Fire every timer due at `now`.
    pub fn fire_due_timers(&mut self, now: Instant) {
        let expired = self.agent.timers_mut().take_expired(now);
        for timer in expired {
            self.on_timer(timer);
        }
    }

    /// Handle one expired timer.
    pub fn on_timer(&mut self, timer: AgentTimer) {
        if self.agent.is_closed() {
            return;
        }
        match timer {
            AgentTimer::Header => {
                self.header_request = None;
                self.agent.close(CloseReason::GetHeaderTimeout);
            }
            AgentTimer::ChainProof => {
                self.chain_proof_requested = false;
                self.agent.close(CloseReason::GetChainProofTimeout);
            }
            AgentTimer::AccountsTreeChunk => {
                self.chunk_request = None;
                self.agent.close(CloseReason::GetAccountsTreeChunkTimeout);
            }
            AgentTimer::SyncRetry => {
                self.waiting_for_ready = false;
                self.sync_blockchain();
            }
            other => self.agent.on_timer(other),
        }
        self.after_step();
    }

    /// Tear the session down.
    pub fn shutdown(&mut self) {
        self.agent.shutdown();
        self.teardown();
    }

    // ==================== Event plumbing ====================

    fn peer_id(&self) -> &meridian_network::PeerId {
        &self.agent.peer().id
    }

    fn after_step(&mut self) {
        while let Some(event) = self.agent.next_event() {
            self.on_agent_event(event);
        }
        if self.agent.is_closed() {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if let Some(mut partial) = self.partial_chain.take() {
            debug!(peer = %self.peer_id(), "Aborting partial chain on teardown");
            partial.abort();
        }
        self.header_request = None;
        self.chain_proof_requested = false;
        self.chunk_request = None;
        self.waiting_for_ready = false;
        self.pending_blocks.clear();
        self.orphaned_blocks.clear();
    }

    fn on_agent_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::BlockReceived(block) => self.process_block(block),
            AgentEvent::KnownBlockAnnounced(block) => self.on_known_block_announced(block),
            AgentEvent::NoUnknownObjects | AgentEvent::AllObjectsProcessed => {
                if self.state.is_syncing() {
                    self.sync_blockchain();
                }
            }
            AgentEvent::AllObjectsReceived => {
                if self.state.is_syncing() && self.agent.inventory().processing_count() == 0 {
                    self.sync_blockchain();
                }
            }
            AgentEvent::GetBlocksTimeout => {
                // The no-progress checks would count this round a second time.
                self.blocks_extending = None;
                self.last_blocks_needed = None;
                self.record_failure(1);
                if self.state.is_syncing() {
                    self.sync_blockchain();
                }
            }
        }
    }

    // ==================== State machine ====================

    fn request_outstanding(&self) -> bool {
        self.header_request.is_some()
            || self.chain_proof_requested
            || self.chunk_request.is_some()
            || self.waiting_for_ready
            || self.agent.timers().exists(AgentTimer::GetBlocks)
    }

    fn sync_blockchain(&mut self) {
        loop {
            if self.agent.is_closed() || self.state == SyncState::Synced {
                return;
            }
            if !self.agent.inventory().is_idle() {
                trace!(
                    peer = %self.peer_id(),
                    in_flight = self.agent.inventory().in_flight_count(),
                    processing = self.agent.inventory().processing_count(),
                    "Waiting for objects"
                );
                return;
            }
            if self.request_outstanding() {
                return;
            }

            let chain = self.chain();
            let head_known = chain.get_block(&self.sync_target, true, false).is_some();

            match self.state {
                SyncState::Idle => {
                    if head_known || !self.agent.peer().services.provides_full_blocks() {
                        self.sync_finished();
                        return;
                    }
                    self.state = SyncState::ChoosingMode;
                    self.on_main_chain = false;
                    self.request_header();
                    return;
                }
                SyncState::ChoosingMode | SyncState::Synced => return,
                SyncState::Catchup => {
                    if head_known {
                        self.sync_finished();
                        return;
                    }
                    if chain.is_busy() {
                        self.wait_for_ready();
                        return;
                    }
                    self.catchup_step();
                    return;
                }
                SyncState::Proof => {
                    if chain.is_busy() {
                        self.wait_for_ready();
                        return;
                    }
                    let stage = match self.partial_chain.as_ref() {
                        Some(partial) => partial.state(),
                        None => {
                            info!(peer = %self.peer_id(), "Starting proof sync");
                            let partial = chain.partial_chain();
                            let stage = partial.state();
                            self.partial_chain = Some(partial);
                            stage
                        }
                    };

                    match stage {
                        PartialChainState::ProveChain => {
                            self.request_chain_proof();
                            return;
                        }
                        PartialChainState::ProveAccountsTree => {
                            self.request_accounts_tree_chunk();
                            return;
                        }
                        PartialChainState::ProveBlocks => {
                            self.request_proof_blocks();
                            return;
                        }
                        PartialChainState::Complete => {
                            if !self.commit_partial_chain() {
                                continue;
                            }
                            if self.agent.is_closed() {
                                return;
                            }
                            if chain.get_block(&self.sync_target, true, false).is_some() {
                                self.sync_finished();
                                return;
                            }
                            info!(
                                peer = %self.peer_id(),
                                "Peer head still unknown after proof sync, catching up"
                            );
                            self.state = SyncState::Catchup;
                            self.on_main_chain = true;
                            self.blocks_extending = None;
                        }
                        PartialChainState::Aborted => {
                            warn!(peer = %self.peer_id(), "Partial chain aborted");
                            self.partial_chain = None;
                            self.state = SyncState::Idle;
                            self.record_failure(1);
                        }
                    }
                }
            }
        }
    }

    /// Commit the completed partial chain; false if the attempt failed.
    fn commit_partial_chain(&mut self) -> bool {
        let Some(mut partial) = self.partial_chain.take() else {
            return false;
        };
        if let Err(e) = partial.commit() {
            warn!(peer = %self.peer_id(), error = %e, "Failed to commit partial chain");
            partial.abort();
            self.state = SyncState::Idle;
            self.record_failure(1);
            return false;
        }
        info!(
            peer = %self.peer_id(),
            height = partial.height(),
            head = %partial.head_hash(),
            "Partial chain committed"
        );
        self.apply_orphaned_blocks();
        true
    }

    fn apply_orphaned_blocks(&mut self) {
        let orphans = std::mem::take(&mut self.orphaned_blocks);
        for block in orphans {
            debug!(peer = %self.peer_id(), height = block.height(), "Applying orphaned block");
            self.pending_blocks.insert(block.hash(), block.clone());
            self.agent.push_block(block);
        }
    }

    fn sync_finished(&mut self) {
        if self.partial_chain.take().is_some() {
            debug!(peer = %self.peer_id(), "Dropping partial chain on sync completion");
        }
        self.state = SyncState::Synced;
        self.blocks_extending = None;
        self.blocks_forking = 0;
        self.fork_head = None;
        self.last_blocks_needed = None;
        info!(peer = %self.peer_id(), head = %self.sync_target, "Synced with peer");
        self.agent.on_sync_finished();
    }

    fn wait_for_ready(&mut self) {
        trace!(peer = %self.peer_id(), "Chain busy, waiting");
        self.waiting_for_ready = true;
        let interval = self.config().sync_retry_interval();
        self.agent
            .timers_mut()
            .set_delay(AgentTimer::SyncRetry, interval);
    }

    /// Add `weight` failures; bans the peer once the limit is reached.
    fn record_failure(&mut self, weight: u32) {
        self.failed_syncs = self.failed_syncs.saturating_add(weight);
        debug!(
            peer = %self.peer_id(),
            failed_syncs = self.failed_syncs,
            "Sync attempt failed"
        );
        if self.failed_syncs >= self.config().max_sync_attempts {
            warn!(peer = %self.peer_id(), "Blockchain sync failed too often");
            if let Some(mut partial) = self.partial_chain.take() {
                partial.abort();
            }
            self.agent.ban(CloseReason::BlockchainSyncFailed);
        }
    }

    // ==================== Mode selection ====================

    fn request_header(&mut self) {
        let hash = self.sync_target;
        debug!(peer = %self.peer_id(), head = %hash, "Requesting peer head header");
        self.header_request = Some(hash);
        self.agent.send(Message::GetHeader(vec![InvVector::block(hash)]));
        let timeout = self.config().header_request_timeout();
        self.agent
            .timers_mut()
            .reset_delay(AgentTimer::Header, timeout);
    }

    fn on_header(&mut self, header: BlockHeader) {
        let hash = header.hash();
        match self.header_request {
            None => {
                warn!(peer = %self.peer_id(), header = %hash, "Unsolicited header, discarding");
                return;
            }
            Some(requested) if requested != hash => {
                warn!(
                    peer = %self.peer_id(),
                    requested = %requested,
                    received = %hash,
                    "Received wrong header"
                );
                self.header_request = None;
                self.agent.close(CloseReason::ReceivedWrongHeader);
                return;
            }
            Some(_) => {}
        }
        self.header_request = None;
        self.agent.timers_mut().clear(AgentTimer::Header);

        let local_height = self.chain().height();
        let gap = header.height.saturating_sub(local_height);
        if gap <= self.config().verification_window {
            info!(
                peer = %self.peer_id(),
                local_height,
                peer_height = header.height,
                "Catching up with peer"
            );
            self.state = SyncState::Catchup;
        } else {
            info!(
                peer = %self.peer_id(),
                local_height,
                peer_height = header.height,
                "Syncing from chain proof"
            );
            self.enter_proof_mode();
        }
        self.sync_blockchain();
    }

    fn enter_proof_mode(&mut self) {
        if let Some(mut partial) = self.partial_chain.take() {
            partial.abort();
        }
        // Answers to the old partial chain's requests are now unsolicited.
        self.chain_proof_requested = false;
        self.chunk_request = None;
        self.agent.timers_mut().clear(AgentTimer::ChainProof);
        self.agent.timers_mut().clear(AgentTimer::AccountsTreeChunk);
        self.state = SyncState::Proof;
        self.on_main_chain = true;
        self.last_blocks_needed = None;
        self.orphaned_blocks.clear();
    }

    // ==================== Catch-up ====================

    fn catchup_step(&mut self) {
        let on_fork =
            self.fork_head.is_some() && self.blocks_extending == Some(0) && self.blocks_forking > 0;

        if self.blocks_extending == Some(0) {
            self.record_failure(1);
            if self.agent.is_closed() {
                return;
            }
        }

        let locators = match (&self.fork_head, on_fork) {
            (Some(fork_head), true) => vec![fork_head.hash()],
            _ => chain_locators(self.agent.chain().as_ref()),
        };
        let max = if self.on_main_chain {
            u16::try_from(self.config().get_blocks_vectors_max).unwrap_or(u16::MAX)
        } else {
            1
        };

        self.blocks_extending = Some(0);
        self.blocks_forking = 0;
        self.agent
            .request_blocks(locators, max, GetBlocksDirection::Forward);
    }

    fn is_deep_fork(&self, block: &Block) -> bool {
        let window = self.config().verification_window;
        block.height().saturating_add(window) < self.chain().height()
    }

    fn switch_to_proof_mode(&mut self) {
        info!(peer = %self.peer_id(), "Peer is on a deep fork, switching to proof sync");
        self.on_main_chain = false;
        self.enter_proof_mode();
    }

    fn on_known_block_announced(&mut self, block: Block) {
        if self.state != SyncState::Catchup {
            return;
        }
        if self.is_deep_fork(&block) {
            self.switch_to_proof_mode();
            return;
        }
        self.on_main_chain = true;

        let hash = block.hash();
        if self.chain().get_block(&hash, false, false).is_none() {
            self.blocks_forking += 1;
            self.track_fork(block);
        }
    }

    fn track_fork(&mut self, block: Block) {
        if let Some(fork_head) = &self.fork_head {
            if !block.is_immediate_successor_of(fork_head) {
                warn!(
                    peer = %self.peer_id(),
                    block = %block.hash(),
                    "Fork blocks do not form a chain"
                );
                self.agent.close(CloseReason::ConspicuousFork);
                return;
            }
        }
        self.fork_head = Some(block);
    }

    // ==================== Block processing ====================

    fn process_block(&mut self, block: Block) {
        let hash = block.hash();
        let vector = InvVector::block(hash);
        let proving_blocks = self.state == SyncState::Proof
            && self.partial_chain_state() == Some(PartialChainState::ProveBlocks);

        if !proving_blocks && self.is_deep_fork(&block) {
            debug!(
                peer = %self.peer_id(),
                block = %hash,
                height = block.height(),
                state = ?self.state,
                "Block far behind our head"
            );
            self.switch_to_proof_mode();
            self.agent.on_object_processed(vector);
            self.sync_blockchain();
            return;
        }

        match self.state {
            SyncState::Proof => {
                if proving_blocks {
                    let result = match self.partial_chain.as_mut() {
                        Some(partial) => partial.push_block(block.clone()),
                        None => PushResult::Invalid,
                    };
                    trace!(peer = %self.peer_id(), block = %hash, ?result, "Pushed proof block");
                    self.on_push_result(&block, result);
                } else {
                    debug!(
                        peer = %self.peer_id(),
                        block = %hash,
                        "Ignoring block outside block proving"
                    );
                }
                self.agent.on_object_processed(vector);
            }
            state => {
                if state == SyncState::Catchup {
                    self.on_main_chain = true;
                }
                self.pending_blocks.insert(hash, block.clone());
                self.agent.push_block(block);
            }
        }
    }

    fn on_push_result(&mut self, block: &Block, result: PushResult) {
        let syncing = self.state.is_syncing();
        match result {
            PushResult::Invalid => {
                warn!(peer = %self.peer_id(), block = %block.hash(), "Received invalid block");
                self.agent.ban(CloseReason::InvalidBlock);
            }
            PushResult::Extended | PushResult::Rebranched => {
                if syncing {
                    self.blocks_extending = Some(self.blocks_extending.unwrap_or(0) + 1);
                }
            }
            PushResult::Forked => {
                if syncing {
                    self.blocks_forking += 1;
                    self.track_fork(block.clone());
                }
            }
            PushResult::Orphan => {
                if self.state == SyncState::Proof {
                    self.orphaned_blocks.push(block.clone());
                } else {
                    debug!(peer = %self.peer_id(), block = %block.hash(), "Orphan block");
                }
            }
            PushResult::Known => {}
        }
    }

    // ==================== Proof stages ====================

    fn restart_proof(&mut self, weight: u32) {
        if let Some(mut partial) = self.partial_chain.take() {
            partial.abort();
        }
        self.last_blocks_needed = None;
        self.record_failure(weight);
    }

    fn request_chain_proof(&mut self) {
        assert!(
            !self.chain_proof_requested,
            "Duplicate chain proof request while one is outstanding"
        );
        debug!(peer = %self.peer_id(), "Requesting chain proof");
        self.chain_proof_requested = true;
        self.agent.send(Message::GetChainProof);
        let timeout = self.config().chain_proof_request_timeout();
        self.agent
            .timers_mut()
            .reset_delay(AgentTimer::ChainProof, timeout);
    }

    fn on_chain_proof(&mut self, proof: ChainProof) {
        if !self.chain_proof_requested {
            warn!(peer = %self.peer_id(), "Unsolicited chain proof, discarding");
            return;
        }
        self.chain_proof_requested = false;
        self.agent.timers_mut().clear(AgentTimer::ChainProof);

        let stage = self.partial_chain.as_ref().map(|p| p.state());
        if stage != Some(PartialChainState::ProveChain) {
            warn!(peer = %self.peer_id(), ?stage, "Chain proof outside chain proving, discarding");
            return;
        }

        let invalid_weight = self.config().invalid_proof_failure_weight;
        if !proof.suffix_contains(&self.sync_target) {
            warn!(
                peer = %self.peer_id(),
                head = %self.sync_target,
                "Chain proof does not contain peer head"
            );
            self.restart_proof(invalid_weight);
            self.sync_blockchain();
            return;
        }

        let headers: Vec<Hash> = proof.suffix.headers.iter().map(|h| h.hash()).collect();
        let head_height = proof.head_height();
        let pushed = match self.partial_chain.as_mut() {
            Some(partial) => partial.push_proof(proof),
            None => return,
        };
        match pushed {
            Ok(()) => {
                info!(peer = %self.peer_id(), height = head_height, "Chain proof accepted");
                for hash in headers {
                    self.agent.note_known(InvVector::block(hash));
                }
            }
            Err(e) => {
                warn!(peer = %self.peer_id(), error = %e, "Chain proof rejected");
                self.restart_proof(invalid_weight);
            }
        }
        self.sync_blockchain();
    }

    fn request_accounts_tree_chunk(&mut self) {
        assert!(
            self.chunk_request.is_none(),
            "Duplicate accounts tree chunk request while one is outstanding"
        );
        let Some(partial) = self.partial_chain.as_ref() else {
            return;
        };
        let request = ChunkRequest {
            block_hash: partial.head_hash(),
            start_prefix: partial.missing_accounts_prefix(),
        };
        debug!(
            peer = %self.peer_id(),
            block = %request.block_hash,
            start_prefix = %hex::encode(&request.start_prefix),
            "Requesting accounts tree chunk"
        );
        self.agent.send(Message::GetAccountsTreeChunk {
            block_hash: request.block_hash,
            start_prefix: request.start_prefix.clone(),
        });
        self.chunk_request = Some(request);
        let timeout = self.config().accounts_tree_chunk_request_timeout();
        self.agent
            .timers_mut()
            .reset_delay(AgentTimer::AccountsTreeChunk, timeout);
    }

    fn on_accounts_tree_chunk(&mut self, block_hash: Hash, chunk: Option<AccountsTreeChunk>) {
        let Some(request) = self.chunk_request.take() else {
            warn!(peer = %self.peer_id(), "Unsolicited accounts tree chunk, discarding");
            return;
        };
        self.agent.timers_mut().clear(AgentTimer::AccountsTreeChunk);

        let Some(chunk) = chunk else {
            debug!(peer = %self.peer_id(), "Peer rejected accounts tree chunk request");
            self.restart_proof(1);
            self.sync_blockchain();
            return;
        };
        if block_hash != request.block_hash {
            warn!(
                peer = %self.peer_id(),
                requested = %request.block_hash,
                received = %block_hash,
                "Accounts tree chunk for wrong block"
            );
            self.restart_proof(1);
            self.sync_blockchain();
            return;
        }

        match self.check_chunk(&request, chunk) {
            Ok(()) => trace!(peer = %self.peer_id(), "Accounts tree chunk merged"),
            Err(reason) => {
                warn!(peer = %self.peer_id(), reason = %reason, "Invalid accounts tree chunk");
                let weight = self.config().invalid_proof_failure_weight;
                self.restart_proof(weight);
            }
        }
        self.sync_blockchain();
    }

    fn check_chunk(&mut self, request: &ChunkRequest, chunk: AccountsTreeChunk) -> Result<(), String> {
        if !chunk.verify() {
            return Err("chunk is not well-formed".into());
        }
        let advances = chunk
            .head_prefix()
            .map(|prefix| prefix > request.start_prefix.as_slice())
            .unwrap_or(false);
        if !advances {
            return Err("chunk does not start after the requested prefix".into());
        }

        let partial = self
            .partial_chain
            .as_mut()
            .ok_or_else(|| "no partial chain".to_string())?;
        let header = partial
            .get_header(&request.block_hash)
            .ok_or_else(|| "reference block unknown".to_string())?;
        let root = chunk.root().map_err(|e| e.to_string())?;
        if root != header.accounts_hash {
            return Err("chunk root does not match accounts hash".into());
        }
        partial
            .push_accounts_tree_chunk(chunk)
            .map_err(|e| e.to_string())
    }

    fn request_proof_blocks(&mut self) {
        let Some(partial) = self.partial_chain.as_ref() else {
            return;
        };
        let needed = partial.num_blocks_needed();
        let locators = partial.block_locators();

        if self.last_blocks_needed == Some(needed) {
            debug!(peer = %self.peer_id(), needed, "No progress proving blocks");
            self.record_failure(1);
            if self.agent.is_closed() {
                return;
            }
        }
        self.last_blocks_needed = Some(needed);

        let max = needed
            .min(self.config().get_blocks_vectors_max)
            .clamp(1, u32::from(u16::MAX));
        let max = u16::try_from(max).unwrap_or(u16::MAX);
        self.agent
            .request_blocks(locators, max, GetBlocksDirection::Backward);
    }
}

impl std::fmt::Debug for LightSyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightSyncAgent")
            .field("agent", &self.agent)
            .field("state", &self.state)
            .field("failed_syncs", &self.failed_syncs)
            .field("partial_chain", &self.partial_chain_state())
            .finish_non_exhaustive()
    }
}
