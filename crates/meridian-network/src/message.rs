//! Peer protocol messages.

use crate::{NetworkError, NetworkResult, Subscription};
use meridian_chain::{
    AccountsProof, AccountsTreeChunk, Address, Block, BlockChain, BlockHeader, ChainProof, Hash,
    Transaction, TransactionReceipt, TransactionsProof,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of inventory vectors in one message.
pub const VECTORS_MAX_COUNT: usize = 1000;

/// Maximum number of block locators in a get-blocks request.
pub const LOCATORS_MAX_COUNT: usize = 128;

/// Maximum number of addresses in a proof request.
pub const ADDRESSES_MAX_COUNT: usize = 256;

/// Kind of object an inventory vector refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InvVectorType {
    Transaction = 1,
    Block = 2,
}

/// Typed hash identifying a block or transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvVector {
    pub ty: InvVectorType,
    pub hash: Hash,
}

impl InvVector {
    pub fn block(hash: Hash) -> Self {
        Self {
            ty: InvVectorType::Block,
            hash,
        }
    }

    pub fn transaction(hash: Hash) -> Self {
        Self {
            ty: InvVectorType::Transaction,
            hash,
        }
    }

    pub fn from_block(block: &Block) -> Self {
        Self::block(block.hash())
    }

    pub fn from_transaction(transaction: &Transaction) -> Self {
        Self::transaction(transaction.hash())
    }

    pub fn is_block(&self) -> bool {
        self.ty == InvVectorType::Block
    }
}

impl fmt::Display for InvVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.ty {
            InvVectorType::Transaction => "tx",
            InvVectorType::Block => "block",
        };
        write!(f, "{}:{}", kind, &self.hash.to_hex()[..16])
    }
}

/// Direction of a get-blocks request relative to the matched locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GetBlocksDirection {
    Forward = 1,
    Backward = 2,
}

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Inv = 1,
    GetData = 2,
    GetHeader = 3,
    NotFound = 4,
    GetBlocks = 5,
    Block = 6,
    Header = 7,
    Tx = 8,
    Mempool = 9,
    Subscribe = 11,
    GetChainProof = 40,
    ChainProof = 41,
    GetAccountsProof = 42,
    AccountsProof = 43,
    GetAccountsTreeChunk = 44,
    AccountsTreeChunk = 45,
    GetTransactionsProof = 47,
    TransactionsProof = 48,
    GetTransactionReceipts = 49,
    TransactionReceipts = 50,
    GetBlockProof = 51,
    BlockProof = 52,
}

impl TryFrom<u8> for MessageType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let ty = match value {
            1 => MessageType::Inv,
            2 => MessageType::GetData,
            3 => MessageType::GetHeader,
            4 => MessageType::NotFound,
            5 => MessageType::GetBlocks,
            6 => MessageType::Block,
            7 => MessageType::Header,
            8 => MessageType::Tx,
            9 => MessageType::Mempool,
            11 => MessageType::Subscribe,
            40 => MessageType::GetChainProof,
            41 => MessageType::ChainProof,
            42 => MessageType::GetAccountsProof,
            43 => MessageType::AccountsProof,
            44 => MessageType::GetAccountsTreeChunk,
            45 => MessageType::AccountsTreeChunk,
            47 => MessageType::GetTransactionsProof,
            48 => MessageType::TransactionsProof,
            49 => MessageType::GetTransactionReceipts,
            50 => MessageType::TransactionReceipts,
            51 => MessageType::GetBlockProof,
            52 => MessageType::BlockProof,
            _ => return Err(NetworkError::UnknownMessageType(value)),
        };
        Ok(ty)
    }
}

/// Decoded peer message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Inventory announcement.
    Inv(Vec<InvVector>),
    /// Request full objects.
    GetData(Vec<InvVector>),
    /// Request block headers.
    GetHeader(Vec<InvVector>),
    /// Requested objects the sender does not have.
    NotFound(Vec<InvVector>),
    /// Request inventory of blocks following the first known locator.
    GetBlocks {
        locators: Vec<Hash>,
        max_inv_size: u16,
        direction: GetBlocksDirection,
    },
    Block(Box<Block>),
    Header(Box<BlockHeader>),
    Tx(Box<Transaction>),
    /// Request announcements of the sender's mempool.
    Mempool,
    /// Declare what the sender wants relayed to it.
    Subscribe(Subscription),
    GetChainProof,
    ChainProof(Box<ChainProof>),
    GetAccountsProof {
        block_hash: Hash,
        addresses: Vec<Address>,
    },
    /// `None` when the sender cannot prove the accounts for that block.
    AccountsProof {
        block_hash: Hash,
        proof: Option<AccountsProof>,
    },
    GetAccountsTreeChunk {
        block_hash: Hash,
        start_prefix: Vec<u8>,
    },
    /// `None` rejects the request.
    AccountsTreeChunk {
        block_hash: Hash,
        chunk: Option<AccountsTreeChunk>,
    },
    GetTransactionsProof {
        block_hash: Hash,
        addresses: Vec<Address>,
    },
    TransactionsProof {
        block_hash: Hash,
        proof: Option<TransactionsProof>,
    },
    GetTransactionReceipts {
        address: Address,
        limit: u16,
    },
    TransactionReceipts(Option<Vec<TransactionReceipt>>),
    GetBlockProof {
        block_hash_to_prove: Hash,
        known_block_hash: Hash,
    },
    BlockProof(Option<BlockChain>),
}

impl Message {
    /// Wire type tag.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::GetHeader(_) => MessageType::GetHeader,
            Message::NotFound(_) => MessageType::NotFound,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::Block(_) => MessageType::Block,
            Message::Header(_) => MessageType::Header,
            Message::Tx(_) => MessageType::Tx,
            Message::Mempool => MessageType::Mempool,
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::GetChainProof => MessageType::GetChainProof,
            Message::ChainProof(_) => MessageType::ChainProof,
            Message::GetAccountsProof { .. } => MessageType::GetAccountsProof,
            Message::AccountsProof { .. } => MessageType::AccountsProof,
            Message::GetAccountsTreeChunk { .. } => MessageType::GetAccountsTreeChunk,
            Message::AccountsTreeChunk { .. } => MessageType::AccountsTreeChunk,
            Message::GetTransactionsProof { .. } => MessageType::GetTransactionsProof,
            Message::TransactionsProof { .. } => MessageType::TransactionsProof,
            Message::GetTransactionReceipts { .. } => MessageType::GetTransactionReceipts,
            Message::TransactionReceipts(_) => MessageType::TransactionReceipts,
            Message::GetBlockProof { .. } => MessageType::GetBlockProof,
            Message::BlockProof(_) => MessageType::BlockProof,
        }
    }

    /// Check size limits of variable-length fields.
    pub fn validate(&self) -> NetworkResult<()> {
        fn limit(kind: &'static str, count: usize, max: usize) -> NetworkResult<()> {
            if count > max {
                return Err(NetworkError::TooManyEntries { kind, count, max });
            }
            Ok(())
        }

        match self {
            Message::Inv(vectors) => limit("inv", vectors.len(), VECTORS_MAX_COUNT),
            Message::GetData(vectors) => limit("get-data", vectors.len(), VECTORS_MAX_COUNT),
            Message::GetHeader(vectors) => limit("get-header", vectors.len(), VECTORS_MAX_COUNT),
            Message::NotFound(vectors) => limit("not-found", vectors.len(), VECTORS_MAX_COUNT),
            Message::GetBlocks {
                locators,
                max_inv_size,
                ..
            } => {
                limit("get-blocks", locators.len(), LOCATORS_MAX_COUNT)?;
                if *max_inv_size == 0 {
                    return Err(NetworkError::InvalidMessage(
                        "get-blocks with zero max_inv_size".into(),
                    ));
                }
                Ok(())
            }
            Message::GetAccountsProof { addresses, .. }
            | Message::GetTransactionsProof { addresses, .. } => {
                if addresses.is_empty() {
                    return Err(NetworkError::InvalidMessage(
                        "proof request without addresses".into(),
                    ));
                }
                limit("addresses", addresses.len(), ADDRESSES_MAX_COUNT)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for tag in 0u8..=255 {
            if let Ok(ty) = MessageType::try_from(tag) {
                assert_eq!(ty as u8, tag);
            }
        }
        assert_eq!(
            MessageType::try_from(10),
            Err(NetworkError::UnknownMessageType(10))
        );
    }

    #[test]
    fn test_message_type_tags() {
        assert_eq!(Message::Mempool.message_type(), MessageType::Mempool);
        assert_eq!(
            Message::AccountsTreeChunk {
                block_hash: Hash::default(),
                chunk: None
            }
            .message_type(),
            MessageType::AccountsTreeChunk
        );
    }

    #[test]
    fn test_validate_limits() {
        let vectors = vec![InvVector::block(Hash::default()); VECTORS_MAX_COUNT + 1];
        assert!(Message::Inv(vectors[..VECTORS_MAX_COUNT].to_vec())
            .validate()
            .is_ok());
        assert!(matches!(
            Message::Inv(vectors).validate(),
            Err(NetworkError::TooManyEntries { kind: "inv", .. })
        ));
        assert!(Message::GetBlocks {
            locators: vec![],
            max_inv_size: 0,
            direction: GetBlocksDirection::Forward,
        }
        .validate()
        .is_err());
        assert!(Message::GetTransactionsProof {
            block_hash: Hash::default(),
            addresses: vec![],
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_vector_display() {
        let v = InvVector::transaction(Hash([0xAB; 32]));
        assert_eq!(v.to_string(), format!("tx:{}", "ab".repeat(8)));
    }
}
