//! Inventory relay and suppression: known-inventory discipline, duplicate
//! announcements, fee filters, and bloom filters.

use crate::generators::{genesis_block, make_chain, spend};
use crate::harness::{TestNode, TestPeer};
use tern_netsync::TxMemPool;
use tern_wire::{BloomFilter, InvVect, Message};

/// A current node with one sync peer already settled (empty headers reply).
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

fn inv_messages(messages: Vec<Message>) -> Vec<InvVect> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            Message::Inv(invs) => Some(invs),
            _ => None,
        })
        .flatten()
        .collect()
}

#[tokio::test]
async fn test_duplicate_inv_yields_single_getdata_and_no_echo() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let peer_b = TestPeer::new(2, 1);
    node.connect(&peer_b).await;

    // A confirmed parent output for the announced transaction to spend.
    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let tx = spend(blocks[0].transactions[0].txid(), 0, 1);
    let inv = InvVect::tx(tx.txid());

    node.handle.queue_inv(vec![inv], peer_a.id()).await.unwrap();
    node.barrier().await;
    assert_eq!(peer_a.expect_get_data().await, vec![inv]);

    // Second announcement while the first request is in flight: no getdata.
    node.handle.queue_inv(vec![inv], peer_b.id()).await.unwrap();
    node.barrier().await;
    peer_b.assert_no_message();

    // Delivery from A; both announcers already know the item, so the relay
    // walk reaches neither.
    node.send_tx(tx.clone(), &peer_a).await;
    assert_eq!(node.notifier.announced_txids(), vec![tx.txid()]);
    assert!(inv_messages(peer_a.drain()).is_empty());
    assert!(inv_messages(peer_b.drain()).is_empty());
}

#[tokio::test]
async fn test_accepted_tx_relayed_only_to_unknowing_peers() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let bystander = TestPeer::new(3, 1);
    node.connect(&bystander).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let tx = spend(blocks[0].transactions[0].txid(), 0, 1);
    let inv = InvVect::tx(tx.txid());

    node.handle.queue_inv(vec![inv], peer_a.id()).await.unwrap();
    node.barrier().await;
    let _ = peer_a.expect_get_data().await;
    node.send_tx(tx, &peer_a).await;

    // The announcer is suppressed, the bystander hears about it, and the
    // announcement marks the bystander as knowing it.
    assert!(inv_messages(peer_a.drain()).is_empty());
    assert_eq!(inv_messages(bystander.drain()), vec![inv]);
    assert!(bystander.handle.knows_inventory(&inv));
}

#[tokio::test]
async fn test_orphan_cascade_relays_with_per_peer_suppression() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let peer_b = TestPeer::new(2, 1);
    let peer_c = TestPeer::new(3, 1);
    node.connect(&peer_b).await;
    node.connect(&peer_c).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);

    // Y spends a confirmed output; X spends Y.
    let tx_y = spend(blocks[0].transactions[0].txid(), 0, 9);
    let tx_x = spend(tx_y.txid(), 0, 8);
    let inv_y = InvVect::tx(tx_y.txid());
    let inv_x = InvVect::tx(tx_x.txid());

    // X first: parent unknown, so it parks in the orphan pool.
    node.send_tx(tx_x.clone(), &peer_b).await;
    assert!(!node.pool.contains(&tx_x.txid()));
    assert!(node.notifier.announced_txids().is_empty());

    // Having sent X does not imply knowing Y.
    assert!(peer_b.handle.knows_inventory(&inv_x));
    assert!(!peer_b.handle.knows_inventory(&inv_y));

    // Y arrives from C: accepted, and X cascades in behind it.
    node.send_tx(tx_y.clone(), &peer_c).await;
    assert!(node.pool.contains(&tx_y.txid()));
    assert!(node.pool.contains(&tx_x.txid()));
    assert_eq!(node.notifier.announced_txids(), vec![tx_y.txid(), tx_x.txid()]);

    // Per-peer suppression: each item skips exactly the peers that know it.
    let to_a = inv_messages(peer_a.drain());
    let to_b = inv_messages(peer_b.drain());
    let to_c = inv_messages(peer_c.drain());

    assert!(to_a.contains(&inv_y) && to_a.contains(&inv_x));
    assert!(to_b.contains(&inv_y) && !to_b.contains(&inv_x));
    assert!(to_c.contains(&inv_x) && !to_c.contains(&inv_y));
}

#[tokio::test]
async fn test_fee_filter_suppresses_cheap_transactions() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let filtered = TestPeer::new(4, 1);
    node.connect(&filtered).await;

    node.handle
        .queue_fee_filter(1_000_000, filtered.id())
        .await
        .unwrap();
    node.barrier().await;
    assert_eq!(filtered.handle.fee_filter(), 1_000_000);

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let parent = blocks[0].transactions[0].txid();

    let cheap = spend(parent, 0, 1);
    let rich = spend(parent, 1, 2);
    node.pool.set_fee(cheap.txid(), 30_000); // ~0.5M per kB
    node.pool.set_fee(rich.txid(), 100_000); // ~1.6M per kB

    node.send_tx(cheap.clone(), &peer_a).await;
    node.send_tx(rich.clone(), &peer_a).await;

    let seen = inv_messages(filtered.drain());
    assert!(!seen.contains(&InvVect::tx(cheap.txid())));
    assert!(seen.contains(&InvVect::tx(rich.txid())));
}

#[tokio::test]
async fn test_negative_fee_filter_is_rejected() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    node.handle.queue_fee_filter(-5, peer_a.id()).await.unwrap();
    node.barrier().await;

    // Noted as misbehavior, filter unchanged, peer still connected.
    assert_eq!(peer_a.handle.fee_filter(), 0);
    assert!(!peer_a.handle.is_disconnect_pending());
}

#[tokio::test]
async fn test_bloom_filter_gates_tx_relay() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let light = TestPeer::new(5, 1);
    node.connect(&light).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let parent = blocks[0].transactions[0].txid();

    let wanted = spend(parent, 0, 7);
    let unwanted = spend(parent, 1, 3);

    // The light peer watches exactly the script of `wanted`.
    let mut filter = BloomFilter::new(16, 5, 0xcafe);
    filter.insert(&wanted.outputs[0].pk_script);
    node.handle
        .queue_filter_load(filter.to_load(), light.id())
        .await
        .unwrap();
    node.barrier().await;
    assert!(light.handle.has_filter());

    node.send_tx(wanted.clone(), &peer_a).await;
    node.send_tx(unwanted.clone(), &peer_a).await;

    let seen = inv_messages(light.drain());
    assert!(seen.contains(&InvVect::tx(wanted.txid())));
    assert!(!seen.contains(&InvVect::tx(unwanted.txid())));
}

#[tokio::test]
async fn test_filtered_block_served_as_merkle_block() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let coinbase = &blocks[0].transactions[0];

    let mut filter = BloomFilter::new(16, 5, 1);
    filter.insert(&coinbase.outputs[0].pk_script);
    node.handle
        .queue_filter_load(filter.to_load(), peer_a.id())
        .await
        .unwrap();

    node.handle
        .queue_get_data(
            vec![InvVect::new(
                tern_wire::InvType::FilteredBlock,
                blocks[0].block_hash(),
            )],
            peer_a.id(),
        )
        .await
        .unwrap();
    node.barrier().await;

    match peer_a.expect_message().await {
        Message::MerkleBlock(mb) => {
            assert_eq!(mb.header, blocks[0].header);
            assert_eq!(mb.total_transactions, 1);
            assert_eq!(mb.matched_hashes, vec![coinbase.txid()]);
        }
        other => panic!("expected merkleblock, got {}", other.command()),
    }
    match peer_a.expect_message().await {
        Message::Tx(tx) => assert_eq!(tx.txid(), coinbase.txid()),
        other => panic!("expected matched tx, got {}", other.command()),
    }
}

#[tokio::test]
async fn test_filter_message_without_bloom_service_bans() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let light = TestPeer::light(9);
    node.connect(&light).await;

    let filter = BloomFilter::new(8, 3, 0);
    node.handle
        .queue_filter_load(filter.to_load(), light.id())
        .await
        .unwrap();
    node.barrier().await;

    assert!(light.handle.is_disconnect_pending());
}

#[tokio::test]
async fn test_mempool_request_respects_fee_and_bloom_filters() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;
    let asker = TestPeer::new(6, 1);
    node.connect(&asker).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 1);
    node.chain.connect_blocks(&blocks);
    let parent = blocks[0].transactions[0].txid();

    // Pool the transactions directly so the asker has never heard of them.
    let cheap = spend(parent, 0, 1);
    let rich = spend(parent, 1, 2);
    node.pool.set_fee(cheap.txid(), 30_000);
    node.pool.set_fee(rich.txid(), 100_000);
    node.pool.accept_transaction(&cheap).unwrap();
    node.pool.accept_transaction(&rich).unwrap();

    node.handle
        .queue_fee_filter(1_000_000, asker.id())
        .await
        .unwrap();
    node.handle.queue_mempool(asker.id()).await.unwrap();
    node.barrier().await;

    let seen = inv_messages(asker.drain());
    assert_eq!(seen, vec![InvVect::tx(rich.txid())]);
}

#[tokio::test]
async fn test_getblocks_serves_inventory_and_marks_known() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 5);
    node.chain.connect_blocks(&blocks);

    node.handle
        .queue_get_blocks(
            tern_wire::BlockLocator::new(vec![blocks[1].block_hash()]),
            tern_wire::Hash::ZERO,
            peer_a.id(),
        )
        .await
        .unwrap();
    node.barrier().await;

    let seen = inv_messages(peer_a.drain());
    let expected: Vec<InvVect> = blocks[2..]
        .iter()
        .map(|b| InvVect::block(b.block_hash()))
        .collect();
    assert_eq!(seen, expected);
    for inv in &expected {
        assert!(peer_a.handle.knows_inventory(inv));
    }
}

#[tokio::test]
async fn test_getheaders_serves_headers_after_locator() {
    let peer_a = TestPeer::new(1, 1);
    let node = current_node(&peer_a).await;

    let blocks = make_chain(genesis_block().block_hash(), 0, 10);
    node.chain.connect_blocks(&blocks);

    node.handle
        .queue_get_headers(
            tern_wire::BlockLocator::new(vec![blocks[2].block_hash()]),
            tern_wire::Hash::ZERO,
            peer_a.id(),
        )
        .await
        .unwrap();
    node.barrier().await;

    match peer_a.expect_message().await {
        Message::Headers(headers) => {
            assert_eq!(headers.len(), 7);
            assert_eq!(headers[0], blocks[3].header);
        }
        other => panic!("expected headers, got {}", other.command()),
    }
}
