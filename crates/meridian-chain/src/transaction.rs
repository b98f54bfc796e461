//! Transactions and transaction receipts.

use crate::{Address, ChainError, ChainResult, Hash};
use serde::{Deserialize, Deserializer, Serialize};

/// A value transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sending account.
    pub sender: Address,
    /// Receiving account.
    pub recipient: Address,
    /// Amount transferred.
    pub value: u64,
    /// Fee paid to the miner.
    pub fee: u64,
    /// First height at which the transaction may be included.
    pub validity_start_height: u32,
    /// Opaque payload, at most [`Transaction::DATA_MAX_SIZE`] bytes.
    #[serde(deserialize_with = "bounded_data")]
    data: Vec<u8>,
}

fn bounded_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let data = Vec::<u8>::deserialize(deserializer)?;
    if data.len() > Transaction::DATA_MAX_SIZE {
        return Err(serde::de::Error::custom(format!(
            "transaction data of {} bytes exceeds {}",
            data.len(),
            Transaction::DATA_MAX_SIZE
        )));
    }
    Ok(data)
}

impl Transaction {
    /// Largest payload the two-byte length prefix can describe.
    pub const DATA_MAX_SIZE: usize = u16::MAX as usize;

    /// Create a transaction without payload.
    pub fn new(
        sender: Address,
        recipient: Address,
        value: u64,
        fee: u64,
        validity_start_height: u32,
    ) -> Self {
        Self {
            sender,
            recipient,
            value,
            fee,
            validity_start_height,
            data: Vec::new(),
        }
    }

    /// Attach a payload; fails if it exceeds [`Self::DATA_MAX_SIZE`].
    pub fn with_data(mut self, data: Vec<u8>) -> ChainResult<Self> {
        if data.len() > Self::DATA_MAX_SIZE {
            return Err(ChainError::DataTooLarge {
                size: data.len(),
                max: Self::DATA_MAX_SIZE,
            });
        }
        self.data = data;
        Ok(self)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Canonical byte encoding, also used for size-based fee rules.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Address::SIZE * 2 + 22 + self.data.len());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.recipient.as_bytes());
        buf.extend_from_slice(&self.value.to_be_bytes());
        buf.extend_from_slice(&self.fee.to_be_bytes());
        buf.extend_from_slice(&self.validity_start_height.to_be_bytes());
        // `data` never exceeds DATA_MAX_SIZE.
        let data_len = u16::try_from(self.data.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&data_len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Transaction hash.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.serialize())
    }

    /// Size of the canonical encoding in bytes.
    pub fn serialized_size(&self) -> usize {
        Address::SIZE * 2 + 22 + self.data.len()
    }

    /// Fee per serialized byte.
    pub fn fee_per_byte(&self) -> f64 {
        self.fee as f64 / self.serialized_size() as f64
    }

    /// Whether `fee / size >= min_fee_per_byte`, in integer arithmetic.
    pub fn pays_fee_per_byte(&self, min_fee_per_byte: u64) -> bool {
        self.fee >= min_fee_per_byte.saturating_mul(self.serialized_size() as u64)
    }

    /// Whether the transaction touches the given address.
    pub fn involves(&self, address: &Address) -> bool {
        &self.sender == address || &self.recipient == address
    }
}

/// Record that a transaction was included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Hash of the included transaction.
    pub transaction_hash: Hash,
    /// Block that includes it.
    pub block_hash: Hash,
    /// Height of that block.
    pub block_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(fee: u64, data_len: usize) -> Transaction {
        Transaction::new(Address([1; 20]), Address([2; 20]), 100, fee, 1)
            .with_data(vec![0u8; data_len])
            .unwrap()
    }

    #[test]
    fn test_serialized_size_matches_encoding() {
        let tx = tx(10, 7);
        assert_eq!(tx.serialize().len(), tx.serialized_size());
    }

    #[test]
    fn test_fee_per_byte_threshold() {
        let size = tx(0, 0).serialized_size() as u64;
        assert!(!tx(size - 1, 0).pays_fee_per_byte(1));
        assert!(tx(size, 0).pays_fee_per_byte(1));
        assert!(tx(0, 0).pays_fee_per_byte(0));
    }

    #[test]
    fn test_largest_payload_keeps_its_length_prefix() {
        let tx = tx(0, Transaction::DATA_MAX_SIZE);
        let encoded = tx.serialize();
        let prefix_at = Address::SIZE * 2 + 20;
        assert_eq!(&encoded[prefix_at..prefix_at + 2], &[0xff, 0xff]);
        assert_eq!(encoded.len(), tx.serialized_size());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let result = Transaction::new(Address([1; 20]), Address([2; 20]), 100, 0, 1)
            .with_data(vec![0u8; Transaction::DATA_MAX_SIZE + 1]);
        assert_eq!(
            result,
            Err(ChainError::DataTooLarge {
                size: Transaction::DATA_MAX_SIZE + 1,
                max: Transaction::DATA_MAX_SIZE,
            })
        );
    }

    #[test]
    fn test_involves() {
        let tx = tx(1, 0);
        assert!(tx.involves(&Address([1; 20])));
        assert!(tx.involves(&Address([2; 20])));
        assert!(!tx.involves(&Address([3; 20])));
    }
}
