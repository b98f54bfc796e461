//! # meridian-network
//!
//! Peer protocol vocabulary shared by the sync core and the transport.
//!
//! This crate provides:
//! - The `Message` sum type, one variant per wire message
//! - Inventory vectors identifying blocks and transactions
//! - Subscription filters a peer declares for relay
//! - Peer identity, advertised services and head
//! - Machine-readable close and ban reasons
//! - A fixed-window rate limiter for served requests
//!
//! Framing and byte encoding belong to the transport; messages reach the
//! core already decoded into `Message`.

mod close;
mod error;
mod message;
mod peer;
mod rate_limit;
mod subscription;

pub use close::CloseReason;
pub use error::{NetworkError, NetworkResult};
pub use message::{
    GetBlocksDirection, InvVector, InvVectorType, Message, MessageType, ADDRESSES_MAX_COUNT,
    LOCATORS_MAX_COUNT, VECTORS_MAX_COUNT,
};
pub use peer::{PeerId, PeerInfo, Services};
pub use rate_limit::RateLimit;
pub use subscription::Subscription;
