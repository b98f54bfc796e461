//! Messages exchanged between a peer session and the node around it.
//!
//! Inbound traffic reaches a session as [`SessionEvent`]s; everything the
//! session wants done (sending, closing, pushing objects into the shared
//! chain and mempool) leaves it as [`SyncCommand`]s.

use crate::SyncResult;
use meridian_chain::{Account, Address, Block, Hash, Transaction, TransactionReceipt};
use meridian_network::{CloseReason, Message, PeerId, Subscription};
use tokio::sync::oneshot;

/// Commands a peer session issues.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    /// Send a message to the session's peer.
    SendToPeer { peer: PeerId, message: Message },
    /// Close the connection.
    ClosePeer { peer: PeerId, reason: CloseReason },
    /// Close the connection and ban the peer.
    BanPeer { peer: PeerId, reason: CloseReason },
    /// Push a received block into the live chain.
    ///
    /// The node answers with [`SessionEvent::BlockProcessed`].
    PushBlock { peer: PeerId, block: Block },
    /// Push a received transaction into the mempool.
    ///
    /// The node answers with [`SessionEvent::TransactionProcessed`].
    PushTransaction {
        peer: PeerId,
        transaction: Transaction,
    },
    /// Our chain caught up with the peer.
    PeerSynced { peer: PeerId },
}

impl SyncCommand {
    /// Peer the command concerns.
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::SendToPeer { peer, .. }
            | Self::ClosePeer { peer, .. }
            | Self::BanPeer { peer, .. }
            | Self::PushBlock { peer, .. }
            | Self::PushTransaction { peer, .. }
            | Self::PeerSynced { peer } => peer,
        }
    }
}

/// Reply channel of an outbound proof request.
pub type Reply<T> = oneshot::Sender<SyncResult<T>>;

/// Events delivered to a peer session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Message received from the peer.
    Message(Message),
    /// The live chain finished processing a pushed block.
    BlockProcessed {
        hash: Hash,
        result: crate::PushResult,
    },
    /// The mempool finished processing a pushed transaction.
    TransactionProcessed { hash: Hash, accepted: bool },
    /// Announce a block; replies whether it was announced.
    RelayBlock {
        block: Block,
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Announce a transaction; replies whether it was queued.
    RelayTransaction {
        transaction: Transaction,
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Transaction left the mempool; stop announcing it.
    RemoveTransaction { hash: Hash },
    /// Change the local subscription.
    Subscribe(Subscription),
    RequestBlockProof {
        block_hash_to_prove: Hash,
        known_block: Block,
        reply: Reply<Block>,
    },
    RequestTransactionsProof {
        block: Block,
        addresses: Vec<Address>,
        reply: Reply<Vec<Transaction>>,
    },
    RequestTransactionReceipts {
        address: Address,
        reply: Reply<Vec<TransactionReceipt>>,
    },
    RequestAccounts {
        block: Block,
        addresses: Vec<Address>,
        reply: Reply<Vec<(Address, Account)>>,
    },
    /// Close the connection from our side.
    Close(CloseReason),
}
