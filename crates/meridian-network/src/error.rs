//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Unknown message type tag.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Too many entries in a message.
    #[error("Too many entries in {kind}: {count}, max {max}")]
    TooManyEntries {
        kind: &'static str,
        count: usize,
        max: usize,
    },

    /// Peer channel closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
