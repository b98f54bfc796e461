//! Hashes and addresses.

use crate::{ChainError, ChainResult};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte Blake2b-256 digest identifying blocks, transactions and tree nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Digest size in bytes.
    pub const SIZE: usize = 32;

    /// Hash arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(data);
        Self::from_digest(hasher)
    }

    /// Hash the concatenation of two digests (inner Merkle node).
    pub fn combine(left: &Hash, right: &Hash) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self::from_digest(hasher)
    }

    fn from_digest(hasher: Blake2b<U32>) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Build from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> ChainResult<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| ChainError::InvalidLength {
            expected: Self::SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Number of leading zero bits.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut bits = 0;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }

    /// Hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Address size in bytes.
    pub const SIZE: usize = 20;

    /// Build from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> ChainResult<Self> {
        let array: [u8; 20] = bytes.try_into().map_err(|_| ChainError::InvalidLength {
            expected: Self::SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(Hash::digest(b"meridian"), Hash::digest(b"meridian"));
        assert_ne!(Hash::digest(b"meridian"), Hash::digest(b"meridiam"));
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Hash::from_slice(&[0u8; 32]).is_ok());
        assert_eq!(
            Hash::from_slice(&[0u8; 31]),
            Err(ChainError::InvalidLength {
                expected: 32,
                got: 31
            })
        );
        assert!(Address::from_slice(&[1u8; 20]).is_ok());
        assert!(Address::from_slice(&[1u8; 32]).is_err());
    }

    #[test]
    fn test_leading_zero_bits() {
        let mut bytes = [0xFFu8; 32];
        assert_eq!(Hash(bytes).leading_zero_bits(), 0);
        bytes[0] = 0;
        bytes[1] = 0x1F;
        assert_eq!(Hash(bytes).leading_zero_bits(), 11);
        assert_eq!(Hash([0u8; 32]).leading_zero_bits(), 256);
    }

    #[test]
    fn test_display_is_hex() {
        let hash = Hash([0xAB; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }
}
