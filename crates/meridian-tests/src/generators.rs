//! Test data generators.
//!
//! Chains are built deterministically: genesis sits at height 1 and every
//! block links to its parent through `prev_hash` and its interlink. Forks are
//! produced by varying the nonce from a shared ancestor.

use meridian_chain::{
    Account, AccountsTreeLeaf, Address, Block, BlockBody, BlockHeader, BlockInterlink, Hash,
    Transaction,
};
use meridian_network::{PeerId, PeerInfo, Services};

/// Deterministic address derived from a seed.
pub fn test_address(seed: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = seed;
    bytes[19] = seed.wrapping_mul(7);
    Address(bytes)
}

/// Deterministic peer identifier.
pub fn test_peer_id(seed: u8) -> PeerId {
    PeerId(vec![0xEE, seed])
}

/// Peer advertising `services` with `head` as its head.
pub fn test_peer(seed: u8, services: Services, head: Hash) -> PeerInfo {
    PeerInfo::new(test_peer_id(seed), services, head)
}

/// Transaction between two seeded addresses.
pub fn test_transaction(seed: u8, fee: u64) -> Transaction {
    Transaction::new(
        test_address(seed),
        test_address(seed.wrapping_add(100)),
        1_000 + u64::from(seed),
        fee,
        1,
    )
}

/// Transaction whose fee per byte is exactly `fee_per_byte`.
pub fn transaction_with_fee_per_byte(seed: u8, fee_per_byte: u64) -> Transaction {
    let mut tx = test_transaction(seed, 0);
    tx.fee = fee_per_byte * tx.serialized_size() as u64;
    tx
}

/// Transaction carrying `payload` bytes of data and no fee.
pub fn free_transaction(seed: u8, payload: usize) -> Transaction {
    test_transaction(seed, 0)
        .with_data(vec![seed; payload])
        .expect("payload fits")
}

/// Genesis block with an empty body.
pub fn genesis_block(accounts_hash: Hash) -> Block {
    let body = BlockBody::new(Address::default(), Vec::new());
    let interlink = BlockInterlink::default();
    let header = BlockHeader {
        version: 1,
        prev_hash: Hash::default(),
        interlink_hash: interlink.hash(),
        body_hash: body.hash(),
        accounts_hash,
        n_bits: 0,
        height: 1,
        timestamp: 1_600_000_000,
        nonce: 0,
    };
    Block::new(header, interlink, Some(body))
}

/// Full block following `prev`.
pub fn next_block(prev: &Block, nonce: u32, transactions: Vec<Transaction>) -> Block {
    let body = BlockBody::new(test_address(1), transactions);
    let interlink = BlockInterlink::for_successor(prev);
    let header = BlockHeader {
        version: 1,
        prev_hash: prev.hash(),
        interlink_hash: interlink.hash(),
        body_hash: body.hash(),
        accounts_hash: prev.header.accounts_hash,
        n_bits: 0,
        height: prev.height() + 1,
        timestamp: prev.header.timestamp + 60,
        nonce,
    };
    Block::new(header, interlink, Some(body))
}

/// Chain of `len` blocks starting at genesis.
pub fn build_chain(len: u32) -> Vec<Block> {
    build_chain_with_accounts(len, Hash::default())
}

/// Chain of `len` blocks whose headers all commit to `accounts_hash`.
pub fn build_chain_with_accounts(len: u32, accounts_hash: Hash) -> Vec<Block> {
    let mut blocks = vec![genesis_block(accounts_hash)];
    while (blocks.len() as u32) < len {
        let prev = &blocks[blocks.len() - 1];
        let next = next_block(prev, 0, Vec::new());
        blocks.push(next);
    }
    blocks
}

/// `count` blocks on top of `from`, distinguished from other branches by `branch`.
pub fn extend_chain(from: &Block, count: u32, branch: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let prev = blocks.last().unwrap_or(from);
        let next = next_block(prev, branch, Vec::new());
        blocks.push(next);
    }
    blocks
}

/// Accounts tree leaves for `count` seeded addresses, ordered by prefix.
pub fn test_accounts(count: u8) -> Vec<AccountsTreeLeaf> {
    let mut leaves: Vec<AccountsTreeLeaf> = (1..=count)
        .map(|seed| AccountsTreeLeaf::new(test_address(seed), Account { balance: u64::from(seed) * 10 }))
        .collect();
    leaves.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    leaves
}

/// Root of [`test_accounts`].
pub fn test_accounts_root(count: u8) -> Hash {
    AccountsTreeLeaf::root_of(&test_accounts(count))
}
