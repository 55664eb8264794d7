//! Mempool gateway behavior: admission, rejection classes, the reject
//! cache, orphan handling, confirmations, and the caller-driven block path.

use crate::generators::{coinbase, genesis_block, make_chain, malicious_tx, spend};
use crate::harness::{TestNode, TestPeer};
use tern_netsync::{SyncError, TxMemPool};
use tern_wire::{Block, BlockHeader, InvVect};

/// A current node with one settled sync peer.
async fn current_node(sync_peer: &TestPeer) -> TestNode {
    let node = TestNode::new();
    node.chain.set_current(true);
    node.connect(sync_peer).await;
    let _ = sync_peer.expect_get_headers().await;
    node.handle
        .queue_headers(Vec::new(), sync_peer.id())
        .await
        .unwrap();
    node
}

#[tokio::test]
async fn test_malicious_transaction_bans_source() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let peer_b = TestPeer::new(2, 1);
    node.connect(&peer_b).await;

    node.send_tx(malicious_tx(1), &peer_b).await;

    assert!(peer_b.handle.is_disconnect_pending());
    assert!(!peer_a.handle.is_disconnect_pending());
    assert!(node.notifier.announced_txids().is_empty());
}

#[tokio::test]
async fn test_policy_rejection_is_silent_and_cached() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);

    let lowball = spend(blocks[0].transactions[0].txid(), 0, 1);
    node.pool.set_fee(lowball.txid(), 0);

    node.send_tx(lowball.clone(), &peer_a).await;
    assert!(!peer_a.handle.is_disconnect_pending());
    assert!(!node.pool.contains(&lowball.txid()));

    // Announcing the same transaction again draws no getdata: the reject
    // cache remembers it.
    peer_a.drain();
    node.handle
        .queue_inv(vec![InvVect::tx(lowball.txid())], peer_a.id())
        .await
        .unwrap();
    node.barrier().await;
    peer_a.assert_no_message();
}

#[tokio::test]
async fn test_orphan_limit_and_duplicate_inv_suppression() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let orphan = spend(tern_wire::Hash::digest(b"nowhere"), 0, 1);
    node.send_tx(orphan.clone(), &peer_a).await;

    // Announcing an orphan we already hold draws no second request.
    peer_a.drain();
    node.handle
        .queue_inv(vec![InvVect::tx(orphan.txid())], peer_a.id())
        .await
        .unwrap();
    node.barrier().await;
    peer_a.assert_no_message();
}

#[tokio::test]
async fn test_confirmation_notifies_and_feeds_estimator() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);

    let tx = spend(blocks[0].transactions[0].txid(), 0, 1);
    node.send_tx(tx.clone(), &peer_a).await;
    assert!(node.pool.contains(&tx.txid()));

    // Mine it into the next block via the caller-driven path.
    let confirming = block_on_tip(&node, 2, vec![tx.clone()]);
    let orphaned = node
        .handle
        .process_block(confirming, Default::default())
        .await
        .unwrap();
    assert!(!orphaned);

    assert!(!node.pool.contains(&tx.txid()));
    assert_eq!(node.notifier.confirmed.lock().clone(), vec![tx.txid()]);
    // The estimator saw the tx at height 0 and its confirmation at height 2.
    assert!(node.estimator.0.estimate_fee_per_kb(2).is_some());
}

#[tokio::test]
async fn test_process_block_is_idempotent_and_relays_once() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    let inv = InvVect::block(blocks[0].block_hash());

    let orphaned = node
        .handle
        .process_block(blocks[0].clone(), Default::default())
        .await
        .unwrap();
    assert!(!orphaned);
    assert_eq!(node.notifier.relay_count(&inv), 1);

    let err = node
        .handle
        .process_block(blocks[0].clone(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateWork));
    assert_eq!(node.notifier.relay_count(&inv), 1);
}

#[tokio::test]
async fn test_process_block_classifies_orphans() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let stray = make_chain(tern_wire::Hash::digest(b"unknown parent"), 10, 1);
    let orphaned = node
        .handle
        .process_block(stray[0].clone(), Default::default())
        .await
        .unwrap();
    assert!(orphaned);
    assert_eq!(node.chain.height(), 0);
}

#[tokio::test]
async fn test_validator_internal_fault_surfaces() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    node.chain.fail_internally();
    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    let err = node
        .handle
        .process_block(blocks[0].clone(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InternalFault(_)));
}

#[tokio::test]
async fn test_unrequested_blocks_accumulate_to_a_ban() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let pusher = TestPeer::new(2, 1);
    node.connect(&pusher).await;

    // Five unsolicited blocks cross the misbehavior threshold.
    let blocks = make_chain(genesis_block().block_hash(), 0, 5);
    for block in &blocks {
        node.send_block(block.clone(), &pusher).await;
    }

    assert!(pusher.handle.is_disconnect_pending());
    // None of them were requested, none reached the validator.
    assert_eq!(node.chain.height(), 0);
}

/// Build a block at the given height extending the current tip.
fn block_on_tip(node: &TestNode, height: u32, mut txs: Vec<tern_wire::Transaction>) -> Block {
    let mut transactions = vec![coinbase(height)];
    transactions.append(&mut txs);
    Block {
        header: BlockHeader {
            version: 1,
            prev_block: node.chain.tip_hash(),
            merkle_root: transactions[0].txid(),
            timestamp: crate::generators::GENESIS_TIME + height as u64 * 60,
            bits: crate::generators::EASY_POW_BITS,
            nonce: height as u64,
        },
        transactions,
    }
}
