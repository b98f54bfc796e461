//! # meridian-sync
//!
//! Per-peer inventory exchange and light chain synchronization.
//!
//! This crate provides:
//! - Inventory bookkeeping: what a peer knows, what we asked for, what is in flight
//! - Batched relay of blocks and transactions, with a byte budget for free transactions
//! - Serving of inventory, headers, proofs and receipts to the peer
//! - Verified proof requests: block, transactions, receipts, accounts
//! - Light sync: catch-up over the live chain, or proof sync into a partial chain
//! - An async session that runs one agent against channels and timers
//!
//! The agents are synchronous state machines. Each entry point consumes one
//! input and leaves outbound [`SyncCommand`]s to be taken by the caller;
//! [`PeerSession`] is the tokio driver that wires them to channels.

mod agent;
mod chain;
mod config;
mod error;
mod inventory;
mod light;
mod locator;
mod protocol;
mod relay;
mod requests;
mod session;
mod timers;

pub use agent::{AgentEvent, AgentTimer, FullSyncAgent};
pub use chain::{
    Blockchain, ChainEvent, Mempool, PartialChain, PartialChainState, PushResult,
};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use inventory::{InventoryIndex, ReceiveOutcome};
pub use light::{LightSyncAgent, SyncState};
pub use locator::{block_locators, chain_locators};
pub use protocol::{Reply, SessionEvent, SyncCommand};
pub use relay::RelayScheduler;
pub use requests::{PendingRequest, RequestKind, RequestSlot};
pub use session::{PeerSession, SessionHandle};
pub use timers::Timers;

/// Objects queued before a get-data request is sent without waiting.
pub const REQUEST_THRESHOLD: usize = 50;

/// Largest inventory a get-blocks request will be answered with.
pub const GET_BLOCKS_VECTORS_MAX: u32 = 500;
