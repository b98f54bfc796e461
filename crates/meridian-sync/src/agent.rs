//! Per-peer inventory exchange and proof requests.
//!
//! `FullSyncAgent` owns everything one peer connection needs to relay,
//! request and serve blocks and transactions. It performs no I/O: handlers
//! mutate the agent and queue [`SyncCommand`]s, which the session runner
//! drains with [`FullSyncAgent::take_commands`]. Conditions the sync state
//! machine reacts to are queued as [`AgentEvent`]s.

use crate::chain::{Blockchain, Mempool};
use crate::inventory::{InventoryIndex, ReceiveOutcome};
use crate::protocol::{Reply, SyncCommand};
use crate::relay::RelayScheduler;
use crate::requests::{RequestKind, RequestSlot};
use crate::timers::Timers;
use crate::{SyncConfig, SyncError};
use meridian_chain::{
    Account, AccountsProof, Address, Block, BlockChain, Hash, Transaction, TransactionReceipt,
    TransactionsProof,
};
use meridian_network::{
    CloseReason, GetBlocksDirection, InvVector, Message, PeerInfo, RateLimit, Subscription,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Timers of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentTimer {
    /// Batch window before requesting queued objects.
    GetDataThrottle,
    /// Get-data response window.
    GetData,
    /// Get-blocks response window.
    GetBlocks,
    TransactionRelay,
    FreeTransactionRelay,
    Header,
    ChainProof,
    AccountsTreeChunk,
    AccountsProof,
    BlockProof,
    TransactionsProof,
    TransactionReceipts,
    /// Poll while the chain is busy.
    SyncRetry,
}

/// Conditions surfaced to the sync state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A requested block arrived and is now processing.
    BlockReceived(Block),
    /// The peer announced a block we already have.
    KnownBlockAnnounced(Block),
    /// An announcement contained nothing we need.
    NoUnknownObjects,
    /// Nothing is in flight and nothing is queued.
    AllObjectsReceived,
    /// Every received object finished processing.
    AllObjectsProcessed,
    /// The peer did not answer a get-blocks request in time.
    GetBlocksTimeout,
}

#[derive(Debug)]
pub(crate) struct BlockProofRequest {
    block_hash_to_prove: Hash,
    known_block: Block,
}

#[derive(Debug)]
pub(crate) struct BlockRequest {
    block: Block,
    addresses: Vec<Address>,
}

/// Inventory exchange with one peer.
pub struct FullSyncAgent {
    peer: PeerInfo,
    config: SyncConfig,
    chain: Arc<dyn Blockchain>,
    mempool: Arc<dyn Mempool>,
    inventory: InventoryIndex,
    relay: RelayScheduler,
    timers: Timers<AgentTimer>,
    /// What the peer wants announced; nothing until it subscribes.
    remote_subscription: Subscription,
    /// What we want announced.
    local_subscription: Subscription,
    last_subscription_change: Option<Instant>,
    get_blocks_limit: RateLimit,
    block_proof: RequestSlot<BlockProofRequest, Block>,
    transactions_proof: RequestSlot<BlockRequest, Vec<Transaction>>,
    transaction_receipts: RequestSlot<Address, Vec<TransactionReceipt>>,
    accounts: RequestSlot<BlockRequest, Vec<(Address, Account)>>,
    outbox: Vec<SyncCommand>,
    events: VecDeque<AgentEvent>,
    synced: bool,
    closed: bool,
}

impl FullSyncAgent {
    /// Create an agent for a freshly connected peer.
    pub fn new(
        peer: PeerInfo,
        config: SyncConfig,
        chain: Arc<dyn Blockchain>,
        mempool: Arc<dyn Mempool>,
    ) -> Self {
        let mut inventory = InventoryIndex::new();
        inventory.note_known(InvVector::block(peer.head_hash));

        let mut timers = Timers::new();
        timers.set_interval(
            AgentTimer::TransactionRelay,
            config.transaction_relay_interval(),
        );
        timers.set_interval(
            AgentTimer::FreeTransactionRelay,
            config.free_transaction_relay_interval(),
        );

        Self {
            get_blocks_limit: RateLimit::per_minute(config.get_blocks_rate_limit),
            local_subscription: config.local_subscription.clone(),
            peer,
            config,
            chain,
            mempool,
            inventory,
            relay: RelayScheduler::new(),
            timers,
            remote_subscription: Subscription::None,
            last_subscription_change: None,
            block_proof: RequestSlot::new(RequestKind::BlockProof),
            transactions_proof: RequestSlot::new(RequestKind::TransactionsProof),
            transaction_receipts: RequestSlot::new(RequestKind::TransactionReceipts),
            accounts: RequestSlot::new(RequestKind::AccountsProof),
            outbox: Vec::new(),
            events: VecDeque::new(),
            synced: false,
            closed: false,
        }
    }

    /// Announce our subscription to the peer.
    pub fn start(&mut self) {
        let subscription = self.local_subscription.clone();
        self.subscribe(subscription);
    }

    // ==================== Accessors ====================

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn Blockchain> {
        &self.chain
    }

    pub fn inventory(&self) -> &InventoryIndex {
        &self.inventory
    }

    pub fn relay(&self) -> &RelayScheduler {
        &self.relay
    }

    pub fn remote_subscription(&self) -> &Subscription {
        &self.remote_subscription
    }

    pub fn local_subscription(&self) -> &Subscription {
        &self.local_subscription
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn timers(&self) -> &Timers<AgentTimer> {
        &self.timers
    }

    pub(crate) fn timers_mut(&mut self) -> &mut Timers<AgentTimer> {
        &mut self.timers
    }

    /// Whether the peer is assumed to hold `vector`.
    pub fn knows(&self, vector: &InvVector) -> bool {
        self.inventory.knows(vector)
    }

    pub fn note_known(&mut self, vector: InvVector) {
        self.inventory.note_known(vector);
    }

    /// Drain queued commands.
    pub fn take_commands(&mut self) -> Vec<SyncCommand> {
        std::mem::take(&mut self.outbox)
    }

    pub fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.pop_front()
    }

    // ==================== Outbound ====================

    pub(crate) fn send(&mut self, message: Message) {
        if self.closed {
            return;
        }
        self.outbox.push(SyncCommand::SendToPeer {
            peer: self.peer.id.clone(),
            message,
        });
    }

    /// Close the connection and tear the session down.
    pub fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        info!(peer = %self.peer.id, reason = %reason, "Closing connection");
        self.outbox.push(SyncCommand::ClosePeer {
            peer: self.peer.id.clone(),
            reason,
        });
        self.shutdown();
    }

    /// Ban the peer and tear the session down.
    pub fn ban(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        warn!(peer = %self.peer.id, reason = %reason, "Banning peer");
        self.outbox.push(SyncCommand::BanPeer {
            peer: self.peer.id.clone(),
            reason,
        });
        self.shutdown();
    }

    /// Drop all per-peer state; pending callers get `PeerClosed`.
    pub fn shutdown(&mut self) {
        if !self.closed {
            debug!(peer = %self.peer.id, "Peer session shut down");
        }
        self.closed = true;
        self.timers.clear_all();
        self.inventory.clear();
        self.relay.clear();
        self.events.clear();
        if let Some(request) = self.block_proof.take() {
            request.reject(SyncError::PeerClosed);
        }
        if let Some(request) = self.transactions_proof.take() {
            request.reject(SyncError::PeerClosed);
        }
        if let Some(request) = self.transaction_receipts.take() {
            request.reject(SyncError::PeerClosed);
        }
        if let Some(request) = self.accounts.take() {
            request.reject(SyncError::PeerClosed);
        }
    }

    /// Announce a block; false if the peer knows it or did not ask for it.
    pub fn relay_block(&mut self, block: &Block) -> bool {
        if self.closed || !self.synced {
            return false;
        }
        if !self.remote_subscription.matches_block(block) {
            return false;
        }
        let vector = InvVector::from_block(block);
        if self.inventory.knows(&vector) {
            return false;
        }

        let vectors = self
            .relay
            .announce_block(vector, self.config.vectors_max_count);
        trace!(peer = %self.peer.id, count = vectors.len(), "Announcing block");
        self.send(Message::Inv(vectors));
        self.inventory.note_known(vector);
        true
    }

    /// Queue a transaction announcement for the next relay interval.
    pub fn relay_transaction(&mut self, transaction: &Transaction) -> bool {
        if self.closed || !self.remote_subscription.matches_transaction(transaction) {
            return false;
        }
        let vector = InvVector::from_transaction(transaction);
        if self.inventory.knows(&vector) {
            return false;
        }

        let free = !transaction.pays_fee_per_byte(self.config.transaction_relay_fee_min);
        self.relay
            .enqueue_transaction(vector, transaction.serialized_size(), free);
        self.inventory.note_known(vector);
        true
    }

    /// Stop announcing a transaction that left the mempool.
    pub fn remove_transaction(&mut self, hash: &Hash) {
        self.relay.remove(&InvVector::transaction(*hash));
    }

    /// Change what we want the peer to announce.
    pub fn subscribe(&mut self, subscription: Subscription) {
        debug!(peer = %self.peer.id, subscription = %subscription, "Subscribing");
        self.local_subscription = subscription.clone();
        self.last_subscription_change = Some(Instant::now());
        self.send(Message::Subscribe(subscription));
    }

    /// Request inventory of blocks following `locators`.
    ///
    /// Returns false if a get-blocks request is already outstanding.
    pub(crate) fn request_blocks(
        &mut self,
        locators: Vec<Hash>,
        max_inv_size: u16,
        direction: GetBlocksDirection,
    ) -> bool {
        if self.timers.exists(AgentTimer::GetBlocks) {
            warn!(peer = %self.peer.id, "Duplicate get-blocks request");
            return false;
        }
        debug!(
            peer = %self.peer.id,
            locators = locators.len(),
            max_inv_size,
            ?direction,
            "Requesting blocks"
        );
        self.timers
            .set_delay(AgentTimer::GetBlocks, self.config.request_timeout());
        self.send(Message::GetBlocks {
            locators,
            max_inv_size,
            direction,
        });
        true
    }

    /// Hand a received block to the live chain.
    pub(crate) fn push_block(&mut self, block: Block) {
        self.outbox.push(SyncCommand::PushBlock {
            peer: self.peer.id.clone(),
            block,
        });
    }

    /// The sync state machine caught up with the peer.
    pub(crate) fn on_sync_finished(&mut self) {
        self.synced = true;
        self.outbox.push(SyncCommand::PeerSynced {
            peer: self.peer.id.clone(),
        });
        if self.local_subscription != Subscription::Any {
            self.subscribe(Subscription::Any);
        }
    }

    // ==================== Outbound proof requests ====================

    /// Ask the peer to prove `block_hash_to_prove` from `known_block`.
    ///
    /// # Panics
    ///
    /// Panics if a block proof request is already outstanding.
    pub fn request_block_proof(
        &mut self,
        block_hash_to_prove: Hash,
        known_block: Block,
        reply: Reply<Block>,
    ) {
        if self.closed {
            let _ = reply.send(Err(SyncError::PeerClosed));
            return;
        }
        let known_block_hash = known_block.hash();
        self.block_proof.begin(
            BlockProofRequest {
                block_hash_to_prove,
                known_block,
            },
            reply,
        );
        self.send(Message::GetBlockProof {
            block_hash_to_prove,
            known_block_hash,
        });
        self.timers.reset_delay(
            AgentTimer::BlockProof,
            self.config.block_proof_request_timeout(),
        );
    }

    /// Ask the peer for the transactions of `block` touching `addresses`.
    ///
    /// # Panics
    ///
    /// Panics if a transactions proof request is already outstanding.
    pub fn request_transactions_proof(
        &mut self,
        block: Block,
        addresses: Vec<Address>,
        reply: Reply<Vec<Transaction>>,
    ) {
        if self.closed {
            let _ = reply.send(Err(SyncError::PeerClosed));
            return;
        }
        let message = Message::GetTransactionsProof {
            block_hash: block.hash(),
            addresses: addresses.clone(),
        };
        self.transactions_proof
            .begin(BlockRequest { block, addresses }, reply);
        self.send(message);
        self.timers.reset_delay(
            AgentTimer::TransactionsProof,
            self.config.transactions_proof_request_timeout(),
        );
    }

    /// Ask the peer for receipts of transactions involving `address`.
    ///
    /// # Panics
    ///
    /// Panics if a receipts request is already outstanding.
    pub fn request_transaction_receipts(
        &mut self,
        address: Address,
        reply: Reply<Vec<TransactionReceipt>>,
    ) {
        if self.closed {
            let _ = reply.send(Err(SyncError::PeerClosed));
            return;
        }
        self.transaction_receipts.begin(address, reply);
        self.send(Message::GetTransactionReceipts {
            address,
            limit: self.config.transaction_receipts_max,
        });
        self.timers.reset_delay(
            AgentTimer::TransactionReceipts,
            self.config.transaction_receipts_request_timeout(),
        );
    }

    /// Ask the peer for the accounts of `addresses` at `block`.
    ///
    /// # Panics
    ///
    /// Panics if an accounts request is already outstanding.
    pub fn request_accounts(
        &mut self,
        block: Block,
        addresses: Vec<Address>,
        reply: Reply<Vec<(Address, Account)>>,
    ) {
        if self.closed {
            let _ = reply.send(Err(SyncError::PeerClosed));
            return;
        }
        let message = Message::GetAccountsProof {
            block_hash: block.hash(),
            addresses: addresses.clone(),
        };
        self.accounts.begin(BlockRequest { block, addresses }, reply);
        self.send(message);
        self.timers.reset_delay(
            AgentTimer::AccountsProof,
            self.config.accounts_proof_request_timeout(),
        );
    }

    // ==================== Inbound ====================

    /// Dispatch a message from the peer.
    pub fn handle_message(&mut self, message: Message) {
        if self.closed {
            return;
        }
        if let Err(e) = message.validate() {
            warn!(peer = %self.peer.id, error = %e, "Malformed message");
            self.ban(CloseReason::MalformedMessage);
            return;
        }

        let ty = message.message_type();
        match message {
            Message::Inv(vectors) => self.on_inv(vectors),
            Message::GetData(vectors) => self.on_get_data(vectors),
            Message::GetHeader(vectors) => self.on_get_header(vectors),
            Message::NotFound(vectors) => self.on_not_found(vectors),
            Message::GetBlocks {
                locators,
                max_inv_size,
                direction,
            } => self.on_get_blocks(locators, max_inv_size, direction),
            Message::Block(block) => self.on_block(*block),
            Message::Tx(transaction) => self.on_tx(*transaction),
            Message::Mempool => self.on_mempool(),
            Message::Subscribe(subscription) => self.on_subscribe(subscription),
            Message::GetChainProof => self.on_get_chain_proof(),
            Message::GetAccountsProof {
                block_hash,
                addresses,
            } => self.on_get_accounts_proof(block_hash, addresses),
            Message::AccountsProof { block_hash, proof } => {
                self.on_accounts_proof(block_hash, proof)
            }
            Message::GetAccountsTreeChunk {
                block_hash,
                start_prefix,
            } => self.on_get_accounts_tree_chunk(block_hash, start_prefix),
            Message::GetTransactionsProof {
                block_hash,
                addresses,
            } => self.on_get_transactions_proof(block_hash, addresses),
            Message::TransactionsProof { block_hash, proof } => {
                self.on_transactions_proof(block_hash, proof)
            }
            Message::GetTransactionReceipts { address, limit } => {
                self.on_get_transaction_receipts(address, limit)
            }
            Message::TransactionReceipts(receipts) => self.on_transaction_receipts(receipts),
            Message::GetBlockProof {
                block_hash_to_prove,
                known_block_hash,
            } => self.on_get_block_proof(block_hash_to_prove, known_block_hash),
            Message::BlockProof(proof) => self.on_block_proof(proof),
            Message::Header(_) | Message::ChainProof(_) | Message::AccountsTreeChunk { .. } => {
                warn!(
                    peer = %self.peer.id,
                    ?ty,
                    "Unsolicited response, discarding"
                );
            }
        }
    }

    fn should_request(&self, vector: &InvVector) -> bool {
        if vector.is_block() {
            // Nano peers only hold headers and ignore get-data for blocks.
            self.peer.services.provides_full_blocks() && self.local_subscription.accepts_blocks()
        } else {
            self.local_subscription.accepts_transactions()
        }
    }

    fn on_inv(&mut self, vectors: Vec<InvVector>) {
        for vector in &vectors {
            self.inventory.note_known(*vector);
            self.relay.remove(vector);
        }
        self.timers.clear(AgentTimer::GetBlocks);

        let mut unknown = 0usize;
        for vector in &vectors {
            if self.inventory.is_pending(vector) || !self.should_request(vector) {
                continue;
            }
            if vector.is_block() {
                match self.chain.get_block(&vector.hash, true, false) {
                    Some(block) => self
                        .events
                        .push_back(AgentEvent::KnownBlockAnnounced(block)),
                    None => {
                        self.inventory.queue(*vector);
                        unknown += 1;
                    }
                }
            } else if self.mempool.get_transaction(&vector.hash).is_none() {
                self.inventory.queue(*vector);
                unknown += 1;
            }
        }

        debug!(
            peer = %self.peer.id,
            count = vectors.len(),
            unknown,
            "Received inventory"
        );

        if unknown == 0 {
            self.events.push_back(AgentEvent::NoUnknownObjects);
            return;
        }

        self.timers.clear(AgentTimer::GetDataThrottle);
        if self.inventory.to_request_count() >= self.config.request_threshold {
            self.request_data();
        } else {
            self.timers
                .set_delay(AgentTimer::GetDataThrottle, self.config.request_throttle());
        }
    }

    fn request_data(&mut self) {
        self.timers.clear(AgentTimer::GetDataThrottle);
        if let Some(vectors) = self.inventory.start_request(self.config.vectors_max_count) {
            debug!(peer = %self.peer.id, count = vectors.len(), "Requesting objects");
            self.send(Message::GetData(vectors));
            self.timers
                .reset_delay(AgentTimer::GetData, self.config.request_timeout());
        }
    }

    fn on_object_received(&mut self, outcome: ReceiveOutcome) {
        match outcome {
            ReceiveOutcome::MoreExpected => {
                self.timers
                    .reset_delay(AgentTimer::GetData, self.config.request_timeout());
            }
            ReceiveOutcome::Drained => self.no_more_data(),
            ReceiveOutcome::Late | ReceiveOutcome::Unsolicited => {}
        }
    }

    fn no_more_data(&mut self) {
        self.timers.clear(AgentTimer::GetData);
        let expired = self.inventory.expire_in_flight();
        if expired > 0 {
            debug!(peer = %self.peer.id, expired, "Objects did not arrive in time");
        }

        if self.inventory.to_request_count() > 0 {
            self.request_data();
        } else {
            self.events.push_back(AgentEvent::AllObjectsReceived);
        }
    }

    fn on_block(&mut self, block: Block) {
        let vector = InvVector::from_block(&block);
        let outcome = self.inventory.receive(&vector);
        if !outcome.is_accepted() {
            warn!(peer = %self.peer.id, block = %vector, "Unsolicited block, discarding");
            return;
        }
        trace!(peer = %self.peer.id, block = %vector, height = block.height(), "Received block");
        self.on_object_received(outcome);
        self.events.push_back(AgentEvent::BlockReceived(block));
    }

    fn within_subscription_grace(&self) -> bool {
        self.last_subscription_change
            .map(|changed| changed.elapsed() < self.config.subscription_change_grace_period())
            .unwrap_or(false)
    }

    fn on_tx(&mut self, transaction: Transaction) {
        let vector = InvVector::from_transaction(&transaction);
        let outcome = self.inventory.receive(&vector);
        if !outcome.is_accepted() {
            warn!(peer = %self.peer.id, tx = %vector, "Unsolicited transaction, discarding");
            return;
        }
        self.on_object_received(outcome);

        if !self.local_subscription.matches_transaction(&transaction) {
            if self.within_subscription_grace() {
                debug!(
                    peer = %self.peer.id,
                    tx = %vector,
                    "Transaction outside subscription during grace period, ignoring"
                );
                self.on_object_processed(vector);
            } else {
                warn!(peer = %self.peer.id, tx = %vector, "Transaction does not match subscription");
                self.close(CloseReason::TransactionNotMatchingSubscription);
            }
            return;
        }

        self.outbox.push(SyncCommand::PushTransaction {
            peer: self.peer.id.clone(),
            transaction,
        });
    }

    fn on_not_found(&mut self, vectors: Vec<InvVector>) {
        debug!(peer = %self.peer.id, count = vectors.len(), "Peer reported objects not found");
        let mut released = false;
        for vector in &vectors {
            released |= self.inventory.release(vector);
        }
        if !released {
            return;
        }
        if self.inventory.in_flight_count() == 0 {
            self.no_more_data();
        } else {
            self.timers
                .reset_delay(AgentTimer::GetData, self.config.request_timeout());
        }
    }

    /// A received object finished processing.
    pub fn on_object_processed(&mut self, vector: InvVector) {
        if self.inventory.finish_processing(&vector) {
            self.events.push_back(AgentEvent::AllObjectsProcessed);
        }
    }

    /// The mempool finished a pushed transaction.
    pub fn on_transaction_processed(&mut self, hash: Hash, accepted: bool) {
        if !accepted {
            debug!(peer = %self.peer.id, tx = %hash, "Mempool rejected transaction");
        }
        self.on_object_processed(InvVector::transaction(hash));
    }

    fn on_subscribe(&mut self, subscription: Subscription) {
        debug!(peer = %self.peer.id, subscription = %subscription, "Peer subscribed");
        self.remote_subscription = subscription;
    }

    // ==================== Serving ====================

    fn on_get_data(&mut self, vectors: Vec<InvVector>) {
        let mut unknown = Vec::new();
        for vector in vectors {
            self.inventory.note_known(vector);
            if vector.is_block() {
                match self.chain.get_block(&vector.hash, false, true) {
                    Some(block) if block.is_full() => self.send(Message::Block(Box::new(block))),
                    _ => unknown.push(vector),
                }
            } else {
                match self.mempool.get_transaction(&vector.hash) {
                    Some(tx) => self.send(Message::Tx(Box::new(tx))),
                    None => unknown.push(vector),
                }
            }
        }
        if !unknown.is_empty() {
            self.send(Message::NotFound(unknown));
        }
    }

    fn on_get_header(&mut self, vectors: Vec<InvVector>) {
        let mut unknown = Vec::new();
        for vector in vectors {
            self.inventory.note_known(vector);
            let block = if vector.is_block() {
                self.chain.get_block(&vector.hash, false, false)
            } else {
                None
            };
            match block {
                Some(block) => self.send(Message::Header(Box::new(block.header))),
                None => unknown.push(vector),
            }
        }
        if !unknown.is_empty() {
            self.send(Message::NotFound(unknown));
        }
    }

    fn on_get_blocks(
        &mut self,
        locators: Vec<Hash>,
        max_inv_size: u16,
        direction: GetBlocksDirection,
    ) {
        if !self.get_blocks_limit.note(1) {
            warn!(peer = %self.peer.id, "Get-blocks rate limit exceeded, ignoring");
            return;
        }
        let max = u32::from(max_inv_size).min(self.config.get_blocks_vectors_max);
        let vectors: Vec<InvVector> = self
            .chain
            .get_blocks_by_locator(&locators, max, direction)
            .into_iter()
            .map(InvVector::block)
            .collect();
        debug!(
            peer = %self.peer.id,
            locators = locators.len(),
            count = vectors.len(),
            "Serving get-blocks"
        );
        self.send(Message::Inv(vectors));
    }

    fn on_mempool(&mut self) {
        let transactions = self
            .mempool
            .transactions(&self.remote_subscription, usize::MAX);
        let vectors: Vec<InvVector> = transactions
            .iter()
            .map(InvVector::from_transaction)
            .collect();
        debug!(peer = %self.peer.id, count = vectors.len(), "Announcing mempool");
        for vector in &vectors {
            self.inventory.note_known(*vector);
        }
        for batch in vectors.chunks(self.config.vectors_max_count) {
            self.send(Message::Inv(batch.to_vec()));
        }
    }

    fn on_get_chain_proof(&mut self) {
        match self.chain.get_chain_proof() {
            Some(proof) => self.send(Message::ChainProof(Box::new(proof))),
            None => warn!(peer = %self.peer.id, "No chain proof available"),
        }
    }

    fn on_get_accounts_proof(&mut self, block_hash: Hash, addresses: Vec<Address>) {
        let proof = self.chain.get_accounts_proof(&block_hash, &addresses);
        self.send(Message::AccountsProof { block_hash, proof });
    }

    fn on_get_accounts_tree_chunk(&mut self, block_hash: Hash, start_prefix: Vec<u8>) {
        let chunk = self.chain.get_accounts_tree_chunk(&block_hash, &start_prefix);
        self.send(Message::AccountsTreeChunk { block_hash, chunk });
    }

    fn on_get_transactions_proof(&mut self, block_hash: Hash, addresses: Vec<Address>) {
        let proof = self.chain.get_transactions_proof(&block_hash, &addresses);
        self.send(Message::TransactionsProof { block_hash, proof });
    }

    fn on_get_transaction_receipts(&mut self, address: Address, limit: u16) {
        let limit = limit.min(self.config.transaction_receipts_max);
        let receipts = self
            .chain
            .get_transaction_receipts(&address, usize::from(limit));
        self.send(Message::TransactionReceipts(Some(receipts)));
    }

    fn on_get_block_proof(&mut self, block_hash_to_prove: Hash, known_block_hash: Hash) {
        let to_prove = self.chain.get_block(&block_hash_to_prove, false, false);
        let known = self.chain.get_block(&known_block_hash, false, false);
        let proof = match (to_prove, known) {
            (Some(to_prove), Some(known)) => self.chain.get_block_proof(&to_prove, &known),
            _ => None,
        };
        self.send(Message::BlockProof(proof));
    }

    // ==================== Proof responses ====================

    fn on_block_proof(&mut self, proof: Option<BlockChain>) {
        let Some(request) = self.block_proof.take() else {
            warn!(peer = %self.peer.id, "Unsolicited block proof, discarding");
            return;
        };
        self.timers.clear(AgentTimer::BlockProof);

        let Some(proof) = proof else {
            request.reject(SyncError::NotFound("block proof".into()));
            return;
        };
        match self.verify_block_proof(&request.params, &proof) {
            Ok(block) => request.resolve(block),
            Err(reason) => {
                warn!(peer = %self.peer.id, reason = %reason, "Invalid block proof");
                request.reject(SyncError::ProofRejected(reason));
                self.close(CloseReason::InvalidBlockProof);
            }
        }
    }

    fn verify_block_proof(
        &self,
        request: &BlockProofRequest,
        proof: &BlockChain,
    ) -> Result<Block, String> {
        let (Some(tail), Some(head)) = (proof.tail(), proof.head()) else {
            return Err("empty proof".into());
        };
        if tail.hash() != request.block_hash_to_prove {
            return Err("proof does not start at the requested block".into());
        }
        if !request.known_block.is_interlink_successor_of(head) {
            return Err("proof does not connect to the known block".into());
        }
        if !proof.verify() {
            return Err("proof chain does not verify".into());
        }
        if let Some(block) = proof.iter().find(|b| !self.chain.verify_header(&b.header)) {
            return Err(format!("invalid header {}", block.hash()));
        }
        Ok(tail.clone())
    }

    fn on_transactions_proof(&mut self, block_hash: Hash, proof: Option<TransactionsProof>) {
        let Some(request) = self.transactions_proof.take() else {
            warn!(peer = %self.peer.id, "Unsolicited transactions proof, discarding");
            return;
        };
        self.timers.clear(AgentTimer::TransactionsProof);

        let expected = request.params.block.hash();
        if block_hash != expected {
            warn!(peer = %self.peer.id, "Transactions proof for wrong block");
            request.reject(SyncError::ProofRejected("wrong reference block".into()));
            self.close(CloseReason::InvalidTransactionsProof);
            return;
        }
        let Some(proof) = proof else {
            request.reject(SyncError::NotFound("transactions proof".into()));
            return;
        };
        match proof.root() {
            Ok(root) if root == request.params.block.header.body_hash => {
                request.resolve(proof.transactions)
            }
            _ => {
                warn!(peer = %self.peer.id, "Transactions proof root mismatch");
                request.reject(SyncError::ProofRejected("body root mismatch".into()));
                self.close(CloseReason::InvalidTransactionsProof);
            }
        }
    }

    fn on_transaction_receipts(&mut self, receipts: Option<Vec<TransactionReceipt>>) {
        let Some(request) = self.transaction_receipts.take() else {
            warn!(peer = %self.peer.id, "Unsolicited transaction receipts, discarding");
            return;
        };
        self.timers.clear(AgentTimer::TransactionReceipts);
        match receipts {
            Some(receipts) => request.resolve(receipts),
            None => request.reject(SyncError::NotFound("transaction receipts".into())),
        }
    }

    fn on_accounts_proof(&mut self, block_hash: Hash, proof: Option<AccountsProof>) {
        let Some(request) = self.accounts.take() else {
            warn!(peer = %self.peer.id, "Unsolicited accounts proof, discarding");
            return;
        };
        self.timers.clear(AgentTimer::AccountsProof);

        if block_hash != request.params.block.hash() {
            warn!(peer = %self.peer.id, "Accounts proof for wrong block");
            request.reject(SyncError::ProofRejected("wrong reference block".into()));
            self.close(CloseReason::InvalidAccountsProof);
            return;
        }
        let Some(proof) = proof else {
            request.reject(SyncError::NotFound("accounts proof".into()));
            return;
        };

        let root_matches = proof.verify()
            && proof.root().ok() == Some(request.params.block.header.accounts_hash);
        let accounts: Option<Vec<(Address, Account)>> = request
            .params
            .addresses
            .iter()
            .map(|address| proof.account(address).map(|account| (*address, account)))
            .collect();

        match accounts {
            Some(accounts) if root_matches => request.resolve(accounts),
            _ => {
                warn!(peer = %self.peer.id, "Invalid accounts proof");
                request.reject(SyncError::ProofRejected("accounts proof mismatch".into()));
                self.close(CloseReason::InvalidAccountsProof);
            }
        }
    }

    // ==================== Timers ====================

    /// Handle an expired timer owned by the agent.
    pub fn on_timer(&mut self, timer: AgentTimer) {
        if self.closed {
            return;
        }
        match timer {
            AgentTimer::GetDataThrottle => self.request_data(),
            AgentTimer::GetData => {
                debug!(
                    peer = %self.peer.id,
                    in_flight = self.inventory.in_flight_count(),
                    "Get-data timed out"
                );
                self.no_more_data();
            }
            AgentTimer::GetBlocks => {
                warn!(peer = %self.peer.id, "Get-blocks timed out");
                self.events.push_back(AgentEvent::GetBlocksTimeout);
            }
            AgentTimer::TransactionRelay => {
                let vectors = self
                    .relay
                    .take_transactions(self.config.vectors_max_count);
                if !vectors.is_empty() {
                    trace!(peer = %self.peer.id, count = vectors.len(), "Relaying transactions");
                    self.send(Message::Inv(vectors));
                }
            }
            AgentTimer::FreeTransactionRelay => {
                let vectors = self.relay.take_free_transactions(
                    self.config.vectors_max_count,
                    self.config.free_transaction_size_per_interval,
                );
                if !vectors.is_empty() {
                    trace!(peer = %self.peer.id, count = vectors.len(), "Relaying free transactions");
                    self.send(Message::Inv(vectors));
                }
            }
            AgentTimer::BlockProof => {
                if let Some(request) = self.block_proof.take() {
                    request.reject(SyncError::Timeout(RequestKind::BlockProof));
                }
                self.close(CloseReason::GetBlockProofTimeout);
            }
            AgentTimer::TransactionsProof => {
                if let Some(request) = self.transactions_proof.take() {
                    request.reject(SyncError::Timeout(RequestKind::TransactionsProof));
                }
                self.close(CloseReason::GetTransactionsProofTimeout);
            }
            AgentTimer::TransactionReceipts => {
                if let Some(request) = self.transaction_receipts.take() {
                    request.reject(SyncError::Timeout(RequestKind::TransactionReceipts));
                }
                self.close(CloseReason::GetTransactionReceiptsTimeout);
            }
            AgentTimer::AccountsProof => {
                if let Some(request) = self.accounts.take() {
                    request.reject(SyncError::Timeout(RequestKind::AccountsProof));
                }
                self.close(CloseReason::GetAccountsProofTimeout);
            }
            AgentTimer::Header
            | AgentTimer::ChainProof
            | AgentTimer::AccountsTreeChunk
            | AgentTimer::SyncRetry => {
                trace!(peer = %self.peer.id, ?timer, "Timer not handled by agent");
            }
        }
    }
}

impl std::fmt::Debug for FullSyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullSyncAgent")
            .field("peer", &self.peer.id)
            .field("synced", &self.synced)
            .field("closed", &self.closed)
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}
