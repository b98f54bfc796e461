//! Serving, subscription and connection lifecycle tests for a single agent.

use crate::generators::*;
use crate::harness::*;
use meridian_chain::{Block, Hash};
use meridian_network::{
    CloseReason, GetBlocksDirection, InvVector, Message, Services, Subscription,
};
use meridian_sync::{FullSyncAgent, LightSyncAgent, SyncCommand, SyncConfig, SyncError};
use std::sync::Arc;

fn serving_agent(blocks: &[Block], config: SyncConfig) -> (FullSyncAgent, MemoryChain) {
    let chain = MemoryChain::from_blocks(blocks);
    let mempool = MemoryMempool::new();
    let peer = test_peer(1, Services::FULL, blocks[0].hash());
    (test_agent(&chain, &mempool, peer, config), chain)
}

fn inv_hashes(commands: &[SyncCommand]) -> Vec<Vec<Hash>> {
    sent_messages(commands)
        .into_iter()
        .filter_map(|message| match message {
            Message::Inv(vectors) => Some(vectors.into_iter().map(|v| v.hash).collect()),
            _ => None,
        })
        .collect()
}

fn get_blocks(locators: Vec<Hash>, max_inv_size: u16) -> Message {
    Message::GetBlocks {
        locators,
        max_inv_size,
        direction: GetBlocksDirection::Forward,
    }
}

fn closures(commands: &[SyncCommand]) -> Vec<SyncCommand> {
    commands
        .iter()
        .filter(|c| matches!(c, SyncCommand::ClosePeer { .. } | SyncCommand::BanPeer { .. }))
        .cloned()
        .collect()
}

// ============================================================================
// Serving objects
// ============================================================================

#[test]
fn test_get_data_serves_known_objects_and_reports_missing() {
    let blocks = build_chain(6);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());
    let missing_block = InvVector::from_block(&extend_chain(&blocks[5], 1, 3)[0]);
    let missing_tx = InvVector::from_transaction(&test_transaction(9, 1_000));

    agent.handle_message(Message::GetData(vec![
        InvVector::from_block(&blocks[3]),
        missing_block,
        missing_tx,
    ]));

    let messages = sent_messages(&agent.take_commands());
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::Block(Box::new(blocks[3].clone())));
    assert_eq!(messages[1], Message::NotFound(vec![missing_block, missing_tx]));
    assert!(agent.knows(&InvVector::from_block(&blocks[3])));
}

#[test]
fn test_get_data_serves_mempool_transactions() {
    let blocks = build_chain(3);
    let chain = MemoryChain::from_blocks(&blocks);
    let mempool = MemoryMempool::new();
    let tx = test_transaction(2, 20_000);
    mempool.insert(tx.clone());
    let mut agent = test_agent(&chain, &mempool, test_peer(1, Services::FULL, blocks[2].hash()), SyncConfig::default());

    agent.handle_message(Message::GetData(vec![InvVector::from_transaction(&tx)]));

    assert_eq!(sent_messages(&agent.take_commands()), vec![Message::Tx(Box::new(tx))]);
}

#[test]
fn test_get_header_serves_headers() {
    let blocks = build_chain(6);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.handle_message(Message::GetHeader(vec![InvVector::from_block(&blocks[4])]));

    assert_eq!(
        sent_messages(&agent.take_commands()),
        vec![Message::Header(Box::new(blocks[4].header.clone()))]
    );
}

#[test]
fn test_get_blocks_starts_after_first_known_locator() {
    let blocks = build_chain(10);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());
    let unknown = extend_chain(&blocks[9], 1, 5)[0].hash();

    agent.handle_message(get_blocks(vec![unknown, blocks[2].hash(), blocks[0].hash()], 2));

    assert_eq!(
        inv_hashes(&agent.take_commands()),
        vec![vec![blocks[3].hash(), blocks[4].hash()]]
    );
}

#[test]
fn test_get_blocks_without_known_locator_starts_at_genesis() {
    let blocks = build_chain(4);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.handle_message(get_blocks(vec![Hash::digest(b"nowhere")], 500));

    assert_eq!(
        inv_hashes(&agent.take_commands()),
        vec![blocks[1..].iter().map(Block::hash).collect::<Vec<_>>()]
    );
}

#[test]
fn test_get_blocks_backward_walks_towards_genesis() {
    let blocks = build_chain(8);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.handle_message(Message::GetBlocks {
        locators: vec![blocks[7].hash()],
        max_inv_size: 3,
        direction: GetBlocksDirection::Backward,
    });

    assert_eq!(
        inv_hashes(&agent.take_commands()),
        vec![vec![blocks[6].hash(), blocks[5].hash(), blocks[4].hash()]]
    );
}

#[test]
fn test_get_blocks_capped_by_config() {
    let blocks = build_chain(10);
    let config = SyncConfig {
        get_blocks_vectors_max: 3,
        ..SyncConfig::default()
    };
    let (mut agent, _chain) = serving_agent(&blocks, config);

    agent.handle_message(get_blocks(vec![blocks[0].hash()], 100));

    let batches = inv_hashes(&agent.take_commands());
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
}

#[test]
fn test_get_blocks_rate_limited() {
    let blocks = build_chain(4);
    let config = SyncConfig {
        get_blocks_rate_limit: 2,
        ..SyncConfig::default()
    };
    let (mut agent, _chain) = serving_agent(&blocks, config);

    for _ in 0..3 {
        agent.handle_message(get_blocks(vec![blocks[0].hash()], 10));
    }

    assert_eq!(inv_hashes(&agent.take_commands()).len(), 2);
    assert!(!agent.is_closed());
}

#[test]
fn test_serves_chain_proof_and_accounts_chunks() {
    let blocks = build_chain_with_accounts(12, test_accounts_root(6));
    let (mut agent, chain) = serving_agent(&blocks, SyncConfig::default());
    chain.set_accounts(test_accounts(6));

    agent.handle_message(Message::GetChainProof);
    agent.handle_message(Message::GetAccountsTreeChunk {
        block_hash: blocks[11].hash(),
        start_prefix: Vec::new(),
    });
    agent.handle_message(Message::GetAccountsTreeChunk {
        block_hash: blocks[3].hash(),
        start_prefix: Vec::new(),
    });

    let messages = sent_messages(&agent.take_commands());
    assert_eq!(messages.len(), 3);
    match &messages[0] {
        Message::ChainProof(proof) => assert_eq!(proof.head_hash(), Some(blocks[11].hash())),
        other => panic!("expected chain proof, got {:?}", other),
    }
    match &messages[1] {
        Message::AccountsTreeChunk { chunk: Some(chunk), .. } => assert_eq!(chunk.len(), CHUNK_SIZE),
        other => panic!("expected chunk, got {:?}", other),
    }
    assert_eq!(
        messages[2],
        Message::AccountsTreeChunk {
            block_hash: blocks[3].hash(),
            chunk: None
        }
    );
}

#[test]
fn test_serves_capped_transaction_receipts() {
    let genesis = genesis_block(Hash::default());
    let txs: Vec<_> = (0..4).map(|i| test_transaction(3, 1_000 + i)).collect();
    let block = next_block(&genesis, 0, txs);
    let config = SyncConfig {
        transaction_receipts_max: 2,
        ..SyncConfig::default()
    };
    let (mut agent, _chain) = serving_agent(&[genesis, block.clone()], config);

    agent.handle_message(Message::GetTransactionReceipts {
        address: test_address(3),
        limit: 100,
    });

    match &sent_messages(&agent.take_commands())[0] {
        Message::TransactionReceipts(Some(receipts)) => {
            assert_eq!(receipts.len(), 2);
            assert!(receipts.iter().all(|r| r.block_hash == block.hash()));
        }
        other => panic!("expected receipts, got {:?}", other),
    }
}

// ============================================================================
// Message validation
// ============================================================================

#[test]
fn test_malformed_message_bans_peer() {
    let blocks = build_chain(3);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.handle_message(get_blocks(vec![blocks[0].hash()], 0));

    let commands = agent.take_commands();
    assert_eq!(
        closures(&commands),
        vec![SyncCommand::BanPeer {
            peer: test_peer_id(1),
            reason: CloseReason::MalformedMessage
        }]
    );
    assert!(sent_messages(&commands).is_empty());
    assert!(agent.is_closed());
}

#[test]
fn test_proof_request_without_addresses_bans_peer() {
    let blocks = build_chain(3);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.handle_message(Message::GetAccountsProof {
        block_hash: blocks[2].hash(),
        addresses: Vec::new(),
    });

    assert!(agent.is_closed());
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Agent subscribed to `subscription` with one transaction of fee `fee` in flight.
fn agent_with_requested_tx(config: SyncConfig, fee: u64) -> (FullSyncAgent, meridian_chain::Transaction) {
    let blocks = build_chain(3);
    let chain = MemoryChain::from_blocks(&blocks);
    let mempool = MemoryMempool::new();
    let mut agent = test_agent(&chain, &mempool, test_peer(1, Services::FULL, blocks[2].hash()), config);
    agent.start();

    let tx = test_transaction(5, fee);
    agent.handle_message(Message::Inv(vec![InvVector::from_transaction(&tx)]));
    agent.on_timer(meridian_sync::AgentTimer::GetDataThrottle);
    agent.take_commands();
    (agent, tx)
}

#[test]
fn test_off_subscription_transaction_ignored_during_grace_period() {
    let config = SyncConfig {
        local_subscription: Subscription::MinFee(10),
        ..SyncConfig::default()
    };
    let (mut agent, tx) = agent_with_requested_tx(config, 1);

    agent.handle_message(Message::Tx(Box::new(tx)));

    let commands = agent.take_commands();
    assert!(closures(&commands).is_empty());
    assert!(!commands.iter().any(|c| matches!(c, SyncCommand::PushTransaction { .. })));
    assert_eq!(agent.inventory().processing_count(), 0);
}

#[test]
fn test_off_subscription_transaction_after_grace_period_closes() {
    let config = SyncConfig {
        local_subscription: Subscription::MinFee(10),
        subscription_change_grace_period_ms: 0,
        ..SyncConfig::default()
    };
    let (mut agent, tx) = agent_with_requested_tx(config, 1);

    agent.handle_message(Message::Tx(Box::new(tx)));

    assert_eq!(
        closures(&agent.take_commands()),
        vec![SyncCommand::ClosePeer {
            peer: test_peer_id(1),
            reason: CloseReason::TransactionNotMatchingSubscription
        }]
    );
}

#[test]
fn test_subscription_widens_to_any_once_synced() {
    let blocks = build_chain(3);
    let chain = MemoryChain::from_blocks(&blocks);
    let config = SyncConfig {
        local_subscription: Subscription::MinFee(2),
        ..SyncConfig::default()
    };
    let peer = test_peer(1, Services::FULL, blocks[2].hash());
    let mut agent = LightSyncAgent::new(peer, config, Arc::new(chain), Arc::new(MemoryMempool::new()));

    agent.start();

    let subscriptions: Vec<Subscription> = sent_messages(&agent.take_commands())
        .into_iter()
        .filter_map(|message| match message {
            Message::Subscribe(subscription) => Some(subscription),
            _ => None,
        })
        .collect();
    assert_eq!(subscriptions, vec![Subscription::MinFee(2), Subscription::Any]);
    assert_eq!(agent.agent().local_subscription(), &Subscription::Any);
}

#[test]
fn test_remote_subscription_recorded() {
    let blocks = build_chain(3);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());
    assert_eq!(agent.remote_subscription(), &Subscription::None);

    agent.handle_message(Message::Subscribe(Subscription::MinFee(3)));

    assert_eq!(agent.remote_subscription(), &Subscription::MinFee(3));
}

// ============================================================================
// Close and shutdown
// ============================================================================

#[test]
fn test_close_is_idempotent_and_silences_agent() {
    let blocks = build_chain(3);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());

    agent.close(CloseReason::GetHeaderTimeout);
    agent.close(CloseReason::GetHeaderTimeout);
    agent.ban(CloseReason::InvalidBlock);
    assert_eq!(closures(&agent.take_commands()).len(), 1);

    agent.handle_message(Message::GetChainProof);
    assert!(agent.take_commands().is_empty());
    assert!(agent.timers().is_empty());
}

#[test]
fn test_shutdown_rejects_pending_requests() {
    let blocks = build_chain(5);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    agent.request_transaction_receipts(test_address(1), tx);

    agent.shutdown();

    assert!(matches!(rx.try_recv(), Ok(Err(SyncError::PeerClosed))));
}

#[test]
fn test_requests_after_close_fail_immediately() {
    let blocks = build_chain(5);
    let (mut agent, _chain) = serving_agent(&blocks, SyncConfig::default());
    agent.close(CloseReason::GetHeaderTimeout);
    agent.take_commands();

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    agent.request_block_proof(blocks[1].hash(), blocks[4].clone(), tx);

    assert!(matches!(rx.try_recv(), Ok(Err(SyncError::PeerClosed))));
    assert!(agent.take_commands().is_empty());
}
