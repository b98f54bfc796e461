//! Error types for chain primitives.

use thiserror::Error;

/// Chain primitive errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Byte slice of the wrong length.
    #[error("Invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    /// Merkle proof could not be evaluated.
    #[error("Invalid Merkle proof: {0}")]
    InvalidMerkleProof(String),

    /// Proof structure is malformed.
    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    /// Block structure is malformed.
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Transaction payload does not fit its length prefix.
    #[error("Transaction data too large: {size} bytes, max {max}")]
    DataTooLarge { size: usize, max: usize },
}

/// Result type for chain primitive operations.
pub type ChainResult<T> = Result<T, ChainError>;
