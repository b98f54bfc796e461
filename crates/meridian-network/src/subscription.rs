//! Relay subscriptions.
//!
//! A subscription describes which objects a peer wants announced to it.
//! The same type is used for the filter a remote peer declares and for the
//! filter we declare to it.

use meridian_chain::{Address, Block, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Interest filter over blocks and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subscription {
    /// Nothing.
    None,
    /// Everything.
    Any,
    /// Blocks, and transactions sent from or to one of these addresses.
    Addresses(BTreeSet<Address>),
    /// Blocks, and transactions paying at least this fee per byte.
    MinFee(u64),
}

impl Subscription {
    /// Subscribe to a set of addresses.
    pub fn addresses<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        Self::Addresses(addresses.into_iter().collect())
    }

    /// Whether a block should be announced.
    pub fn matches_block(&self, _block: &Block) -> bool {
        self.accepts_blocks()
    }

    /// Whether any block can match at all.
    pub fn accepts_blocks(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether a transaction should be announced.
    pub fn matches_transaction(&self, transaction: &Transaction) -> bool {
        match self {
            Self::None => false,
            Self::Any => true,
            Self::Addresses(addresses) => {
                addresses.contains(&transaction.sender) || addresses.contains(&transaction.recipient)
            }
            Self::MinFee(min_fee_per_byte) => transaction.pays_fee_per_byte(*min_fee_per_byte),
        }
    }

    /// Whether any transaction can match at all.
    pub fn accepts_transactions(&self) -> bool {
        match self {
            Self::None => false,
            Self::Addresses(addresses) => !addresses.is_empty(),
            Self::Any | Self::MinFee(_) => true,
        }
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Any => write!(f, "any"),
            Self::Addresses(addresses) => write!(f, "addresses({})", addresses.len()),
            Self::MinFee(fee) => write!(f, "min-fee({}/byte)", fee),
        }
    }
}
