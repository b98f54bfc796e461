//! Async runner for one peer's sync agent.
//!
//! A [`PeerSession`] owns a [`LightSyncAgent`] and feeds it inbound events,
//! chain notifications and timer expirations one at a time, forwarding the
//! commands it produces to the node. Callers talk to a running session
//! through a cloneable [`SessionHandle`].

use crate::chain::{ChainEvent, PushResult};
use crate::light::LightSyncAgent;
use crate::protocol::{SessionEvent, SyncCommand};
use crate::{SyncError, SyncResult};
use meridian_chain::{Account, Address, Block, Hash, Transaction, TransactionReceipt};
use meridian_network::{CloseReason, Message, PeerId, Subscription};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Runs one peer's sync agent.
pub struct PeerSession {
    agent: LightSyncAgent,
    events: mpsc::Receiver<SessionEvent>,
    commands: mpsc::Sender<SyncCommand>,
    chain_events: Option<broadcast::Receiver<ChainEvent>>,
}

impl PeerSession {
    /// Create a session and the handle that drives it.
    pub fn new(
        agent: LightSyncAgent,
        commands: mpsc::Sender<SyncCommand>,
        chain_events: broadcast::Receiver<ChainEvent>,
        capacity: usize,
    ) -> (Self, SessionHandle) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let handle = SessionHandle {
            peer: agent.agent().peer().id.clone(),
            events: event_tx,
            gates: Arc::new(RequestGates::default()),
        };
        let session = Self {
            agent,
            events: event_rx,
            commands,
            chain_events: Some(chain_events),
        };
        (session, handle)
    }

    pub fn agent(&self) -> &LightSyncAgent {
        &self.agent
    }

    /// Run until the peer is closed or every handle is dropped.
    pub async fn run(mut self) -> SyncResult<()> {
        let peer = self.agent.agent().peer().id.clone();
        info!(peer = %peer, "Peer session started");

        self.agent.start();
        self.flush().await?;

        while !self.agent.is_closed() {
            let deadline = self.agent.next_deadline();
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.agent.handle_event(event),
                        None => {
                            debug!(peer = %peer, "All session handles dropped");
                            break;
                        }
                    }
                }
                result = recv_chain_event(&mut self.chain_events) => {
                    match result {
                        Ok(ChainEvent::Ready) => self.agent.on_chain_ready(),
                        Ok(ChainEvent::HeadChanged { hash, height }) => {
                            trace!(peer = %peer, head = %hash, height, "Chain head changed");
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(peer = %peer, skipped, "Missed chain events");
                            // Ready may have been among the skipped events.
                            self.agent.on_chain_ready();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(peer = %peer, "Chain event channel closed");
                            self.chain_events = None;
                        }
                    }
                }
                _ = sleep_until_deadline(deadline) => {
                    self.agent.fire_due_timers(Instant::now());
                }
            }

            if let Err(e) = self.flush().await {
                self.agent.shutdown();
                return Err(e);
            }
        }

        self.agent.shutdown();
        let result = self.flush().await;
        info!(peer = %peer, "Peer session ended");
        result
    }

    async fn flush(&mut self) -> SyncResult<()> {
        for command in self.agent.take_commands() {
            self.commands
                .send(command)
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
        }
        Ok(())
    }
}

async fn recv_chain_event(
    receiver: &mut Option<broadcast::Receiver<ChainEvent>>,
) -> Result<ChainEvent, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Serializes outbound proof requests per kind, so callers queue instead of
/// tripping the one-outstanding-request rule.
#[derive(Default)]
struct RequestGates {
    block_proof: Mutex<()>,
    transactions_proof: Mutex<()>,
    transaction_receipts: Mutex<()>,
    accounts: Mutex<()>,
}

/// Cloneable handle to a running [`PeerSession`].
#[derive(Clone)]
pub struct SessionHandle {
    peer: PeerId,
    events: mpsc::Sender<SessionEvent>,
    gates: Arc<RequestGates>,
}

impl SessionHandle {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Whether the session has stopped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    async fn send(&self, event: SessionEvent) -> SyncResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| SyncError::PeerClosed)
    }

    /// Deliver a message received from the peer.
    pub async fn deliver(&self, message: Message) -> SyncResult<()> {
        self.send(SessionEvent::Message(message)).await
    }

    /// Report the live chain's verdict on a pushed block.
    pub async fn block_processed(&self, hash: Hash, result: PushResult) -> SyncResult<()> {
        self.send(SessionEvent::BlockProcessed { hash, result }).await
    }

    /// Report the mempool's verdict on a pushed transaction.
    pub async fn transaction_processed(&self, hash: Hash, accepted: bool) -> SyncResult<()> {
        self.send(SessionEvent::TransactionProcessed { hash, accepted })
            .await
    }

    /// Announce a block to the peer. Returns whether it was announced.
    pub async fn relay_block(&self, block: Block) -> bool {
        let (reply, rx) = oneshot::channel();
        let event = SessionEvent::RelayBlock {
            block,
            reply: Some(reply),
        };
        if self.send(event).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue a transaction for announcement. Returns whether it was queued.
    pub async fn relay_transaction(&self, transaction: Transaction) -> bool {
        let (reply, rx) = oneshot::channel();
        let event = SessionEvent::RelayTransaction {
            transaction,
            reply: Some(reply),
        };
        if self.send(event).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn remove_transaction(&self, hash: Hash) -> SyncResult<()> {
        self.send(SessionEvent::RemoveTransaction { hash }).await
    }

    /// Replace the local subscription.
    pub async fn subscribe(&self, subscription: Subscription) -> SyncResult<()> {
        self.send(SessionEvent::Subscribe(subscription)).await
    }

    /// Obtain the block `block_hash_to_prove` proven from `known_block`.
    pub async fn get_block_proof(
        &self,
        block_hash_to_prove: Hash,
        known_block: Block,
    ) -> SyncResult<Block> {
        let _gate = self.gates.block_proof.lock().await;
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::RequestBlockProof {
            block_hash_to_prove,
            known_block,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::PeerClosed)?
    }

    /// Obtain the transactions of `block` touching `addresses`.
    pub async fn get_transactions_proof(
        &self,
        block: Block,
        addresses: Vec<Address>,
    ) -> SyncResult<Vec<Transaction>> {
        let _gate = self.gates.transactions_proof.lock().await;
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::RequestTransactionsProof {
            block,
            addresses,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::PeerClosed)?
    }

    /// Obtain receipts of transactions involving `address`.
    pub async fn get_transaction_receipts(
        &self,
        address: Address,
    ) -> SyncResult<Vec<TransactionReceipt>> {
        let _gate = self.gates.transaction_receipts.lock().await;
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::RequestTransactionReceipts { address, reply })
            .await?;
        rx.await.map_err(|_| SyncError::PeerClosed)?
    }

    /// Obtain proven accounts of `addresses` at `block`.
    pub async fn get_accounts(
        &self,
        block: Block,
        addresses: Vec<Address>,
    ) -> SyncResult<Vec<(Address, Account)>> {
        let _gate = self.gates.accounts.lock().await;
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::RequestAccounts {
            block,
            addresses,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::PeerClosed)?
    }

    /// Close the connection from our side.
    pub async fn close(&self, reason: CloseReason) -> SyncResult<()> {
        self.send(SessionEvent::Close(reason)).await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
