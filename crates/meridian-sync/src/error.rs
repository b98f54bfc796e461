//! Sync error types.

use crate::requests::RequestKind;
use thiserror::Error;

/// Sync errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] meridian_network::NetworkError),

    /// Chain primitive error.
    #[error("Chain error: {0}")]
    Chain(#[from] meridian_chain::ChainError),

    /// No response within the request window.
    #[error("Request timed out: {0}")]
    Timeout(RequestKind),

    /// Response failed verification.
    #[error("Proof rejected: {0}")]
    ProofRejected(String),

    /// Peer does not have the requested data.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Peer connection closed before the request completed.
    #[error("Peer connection closed")]
    PeerClosed,

    /// Invalid data from a collaborator.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Command or event channel closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
