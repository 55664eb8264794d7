//! Test harness: in-memory collaborators and a running sync manager.
//!
//! `MemChain` stands in for the out-of-scope validator (linkage bookkeeping
//! only, no script validation), `PoolAdapter` backs the mempool seam with
//! the real `tern-mempool` pool, and `RecordingNotifier` captures every
//! outbound notification while forwarding relay through the real
//! suppression walk.

use crate::generators::genesis_block;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tern_mempool::{MempoolConfig, MempoolError, PooledTransaction, TxPool};
use tern_netsync::{
    relay_to_peers, BehaviorFlags, Chain, ChainError, ChainParams, ChainSnapshot, Checkpoint,
    Config, FeeSink, PeerHandle, PeerId, PeerNotifier, RelayPayload, SyncHandle, SyncManager,
    Tuning, TxAcceptance, TxMemPool, TxRejection,
};
use tern_wire::{
    locator_indexes, Block, BlockHeader, BlockLocator, Hash, InvVect, Message, ServiceFlags,
    Transaction, MAX_HEADERS_PER_MSG, PROTOCOL_VERSION,
};
use tokio::time::timeout;

use crate::generators::EASY_POW_BITS;

/// Fee attributed to test transactions unless overridden.
pub const DEFAULT_TEST_FEE: i64 = 50_000;

struct MemChainInner {
    blocks: HashMap<Hash, (Block, u32)>,
    by_height: Vec<Hash>,
    txids: HashSet<Hash>,
}

/// In-memory stand-in for the block-chain validator.
///
/// Tracks a single linear chain, classifies unknown-parent submissions as
/// orphans, and records which blocks were submitted with the fast-add flag.
pub struct MemChain {
    inner: Mutex<MemChainInner>,
    current: AtomicBool,
    fast_added: Mutex<HashSet<Hash>>,
    rejected: Mutex<HashSet<Hash>>,
    internal_fault: AtomicBool,
}

impl MemChain {
    /// A chain holding only the deterministic genesis block.
    pub fn new() -> Self {
        let genesis = genesis_block();
        let hash = genesis.block_hash();
        let mut blocks = HashMap::new();
        let mut txids = HashSet::new();
        for tx in &genesis.transactions {
            txids.insert(tx.txid());
        }
        blocks.insert(hash, (genesis, 0));

        Self {
            inner: Mutex::new(MemChainInner {
                blocks,
                by_height: vec![hash],
                txids,
            }),
            current: AtomicBool::new(false),
            fast_added: Mutex::new(HashSet::new()),
            rejected: Mutex::new(HashSet::new()),
            internal_fault: AtomicBool::new(false),
        }
    }

    /// Toggle the validator's recency view.
    pub fn set_current(&self, current: bool) {
        self.current.store(current, Ordering::Relaxed);
    }

    /// Mark a block hash to be rejected as a rule violation.
    pub fn reject_block(&self, hash: Hash) {
        self.rejected.lock().insert(hash);
    }

    /// Make every subsequent submission fail internally.
    pub fn fail_internally(&self) {
        self.internal_fault.store(true, Ordering::Relaxed);
    }

    /// Height of the best block.
    pub fn height(&self) -> u32 {
        (self.inner.lock().by_height.len() - 1) as u32
    }

    /// Hash of the best block.
    pub fn tip_hash(&self) -> Hash {
        *self.inner.lock().by_height.last().unwrap()
    }

    /// Whether a block was submitted with fast-add.
    pub fn was_fast_added(&self, hash: &Hash) -> bool {
        self.fast_added.lock().contains(hash)
    }

    /// Pre-populate the chain, panicking on any rejection.
    pub fn connect_blocks(&self, blocks: &[Block]) {
        for block in blocks {
            let orphan = self
                .process_block(block, BehaviorFlags::NONE)
                .expect("test block rejected");
            assert!(!orphan, "test block orphaned");
        }
    }
}

impl Default for MemChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain for MemChain {
    fn best_snapshot(&self) -> ChainSnapshot {
        let inner = self.inner.lock();
        let hash = *inner.by_height.last().unwrap();
        let (block, height) = &inner.blocks[&hash];
        ChainSnapshot {
            hash,
            height: *height,
            timestamp: block.header.timestamp,
        }
    }

    fn have_block(&self, hash: &Hash) -> bool {
        self.inner.lock().blocks.contains_key(hash)
    }

    fn block_height(&self, hash: &Hash) -> Option<u32> {
        self.inner.lock().blocks.get(hash).map(|(_, h)| *h)
    }

    fn block_locator(&self) -> BlockLocator {
        let inner = self.inner.lock();
        let tip_height = (inner.by_height.len() - 1) as u32;
        let hashes = locator_indexes(tip_height)
            .into_iter()
            .map(|h| inner.by_height[h as usize])
            .collect();
        BlockLocator::new(hashes)
    }

    fn process_block(&self, block: &Block, flags: BehaviorFlags) -> Result<bool, ChainError> {
        if self.internal_fault.load(Ordering::Relaxed) {
            return Err(ChainError::Internal("disk failure (injected)".into()));
        }

        let hash = block.block_hash();
        if self.rejected.lock().contains(&hash) {
            return Err(ChainError::Rule {
                reason: "marked invalid by test".into(),
                malicious: true,
            });
        }

        let mut inner = self.inner.lock();
        if inner.blocks.contains_key(&hash) {
            return Err(ChainError::Duplicate(hash));
        }

        let tip = *inner.by_height.last().unwrap();
        match inner.blocks.get(&block.header.prev_block) {
            None => Ok(true),
            Some((_, parent_height)) => {
                if block.header.prev_block != tip {
                    return Err(ChainError::Rule {
                        reason: "test chain only extends the tip".into(),
                        malicious: false,
                    });
                }
                let height = parent_height + 1;
                for tx in &block.transactions {
                    inner.txids.insert(tx.txid());
                }
                inner.blocks.insert(hash, (block.clone(), height));
                inner.by_height.push(hash);
                drop(inner);

                if flags.fast_add {
                    self.fast_added.lock().insert(hash);
                }
                Ok(false)
            }
        }
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.inner.lock().blocks.get(hash).map(|(b, _)| b.clone())
    }

    fn headers_after(&self, locator: &BlockLocator, stop_hash: &Hash) -> Vec<BlockHeader> {
        let inner = self.inner.lock();
        let mut start = 0usize;
        for hash in locator.iter() {
            if let Some((_, height)) = inner.blocks.get(hash) {
                start = *height as usize;
                break;
            }
        }

        let mut headers = Vec::new();
        for height in (start + 1)..inner.by_height.len() {
            let hash = inner.by_height[height];
            headers.push(inner.blocks[&hash].0.header);
            if hash == *stop_hash || headers.len() >= MAX_HEADERS_PER_MSG {
                break;
            }
        }
        headers
    }

    fn block_hashes_after(
        &self,
        locator: &BlockLocator,
        stop_hash: &Hash,
        max: usize,
    ) -> Vec<Hash> {
        let inner = self.inner.lock();
        let mut start = 0usize;
        for hash in locator.iter() {
            if let Some((_, height)) = inner.blocks.get(hash) {
                start = *height as usize;
                break;
            }
        }

        let mut hashes = Vec::new();
        for height in (start + 1)..inner.by_height.len() {
            let hash = inner.by_height[height];
            hashes.push(hash);
            if hash == *stop_hash || hashes.len() >= max {
                break;
            }
        }
        hashes
    }

    fn transaction_in_chain(&self, txid: &Hash) -> bool {
        self.inner.lock().txids.contains(txid)
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::Relaxed)
    }
}

/// Bridges the netsync `TxMemPool` seam onto the real `tern-mempool` pool.
///
/// Policy classification lives here: missing parents are derived from chain
/// and pool knowledge, a negative version marks a malicious encoding, and
/// pool policy errors map to silent rejections.
pub struct PoolAdapter {
    pool: TxPool,
    chain: Arc<MemChain>,
    fees: Mutex<HashMap<Hash, i64>>,
}

impl PoolAdapter {
    /// A pool over the given chain view.
    pub fn new(chain: Arc<MemChain>) -> Self {
        Self {
            pool: TxPool::new(MempoolConfig {
                min_fee_per_kb: 1,
                ..Default::default()
            }),
            chain,
            fees: Mutex::new(HashMap::new()),
        }
    }

    /// Attribute a fee to a transaction before submitting it.
    pub fn set_fee(&self, txid: Hash, fee: i64) {
        self.fees.lock().insert(txid, fee);
    }

    /// The underlying pool.
    pub fn pool(&self) -> &TxPool {
        &self.pool
    }

    fn fee_for(&self, txid: &Hash) -> i64 {
        self.fees.lock().get(txid).copied().unwrap_or(DEFAULT_TEST_FEE)
    }
}

impl TxMemPool for PoolAdapter {
    fn contains(&self, txid: &Hash) -> bool {
        self.pool.contains(txid)
    }

    fn accept_transaction(&self, tx: &Transaction) -> Result<TxAcceptance, TxRejection> {
        let txid = tx.txid();

        if tx.version < 0 {
            return Err(TxRejection::Malicious("negative version".into()));
        }
        if self.pool.contains(&txid) || self.chain.transaction_in_chain(&txid) {
            return Err(TxRejection::Duplicate);
        }

        let mut missing: Vec<Hash> = Vec::new();
        for input in &tx.inputs {
            let parent = input.previous_output.txid;
            if input.previous_output.is_null() {
                continue;
            }
            if !self.chain.transaction_in_chain(&parent)
                && !self.pool.contains(&parent)
                && !missing.contains(&parent)
            {
                missing.push(parent);
            }
        }
        if !missing.is_empty() {
            return Err(TxRejection::MissingInputs(missing));
        }

        let entry = PooledTransaction::new(tx.clone(), self.fee_for(&txid));
        let fee_per_kb = entry.fee_per_kb();
        match self.pool.add(entry) {
            Ok(()) => Ok(TxAcceptance {
                txid,
                tx: tx.clone(),
                fee_per_kb,
            }),
            Err(MempoolError::AlreadyExists(_)) => Err(TxRejection::Duplicate),
            Err(err) => Err(TxRejection::Policy(err.to_string())),
        }
    }

    fn fetch_transaction(&self, txid: &Hash) -> Option<Transaction> {
        self.pool.get(txid).map(|entry| entry.tx)
    }

    fn confirmed_block(&self, block: &Block) -> Vec<Hash> {
        self.pool.remove_confirmed(&block.transactions)
    }

    fn inventory_above(&self, min_fee_per_kb: i64) -> Vec<Hash> {
        self.pool.ids_above_fee_rate(min_fee_per_kb)
    }

    fn count(&self) -> usize {
        self.pool.stats().tx_count
    }
}

/// Records every notifier call and forwards relay through the real
/// suppression walk over registered peer handles.
#[derive(Default)]
pub struct RecordingNotifier {
    peers: Mutex<Vec<Arc<PeerHandle>>>,
    /// Accepted transactions announced, in order.
    pub announced: Mutex<Vec<Hash>>,
    /// `update_peer_heights` calls.
    pub height_updates: Mutex<Vec<(Hash, u32, Option<PeerId>)>>,
    /// Inventory handed to relay.
    pub relayed: Mutex<Vec<InvVect>>,
    /// Confirmed mempool transactions.
    pub confirmed: Mutex<Vec<Hash>>,
}

impl RecordingNotifier {
    /// New empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer for relay fan-out.
    pub fn register_peer(&self, peer: Arc<PeerHandle>) {
        self.peers.lock().push(peer);
    }

    /// Txids announced so far.
    pub fn announced_txids(&self) -> Vec<Hash> {
        self.announced.lock().clone()
    }

    /// Number of relay calls for a given inventory vector.
    pub fn relay_count(&self, inv: &InvVect) -> usize {
        self.relayed.lock().iter().filter(|iv| *iv == inv).count()
    }
}

impl PeerNotifier for RecordingNotifier {
    fn announce_new_transactions(&self, txs: &[TxAcceptance]) {
        let peers = self.peers.lock().clone();
        for acceptance in txs {
            self.announced.lock().push(acceptance.txid);
            let inv = InvVect::tx(acceptance.txid);
            self.relayed.lock().push(inv);
            relay_to_peers(&peers, inv, &RelayPayload::Tx(acceptance.clone()));
        }
    }

    fn update_peer_heights(&self, hash: &Hash, height: u32, source: Option<PeerId>) {
        self.height_updates.lock().push((*hash, height, source));
        for peer in self.peers.lock().iter() {
            if Some(peer.id()) == source {
                continue;
            }
            if peer.height() < height {
                peer.set_height(height);
            }
        }
    }

    fn relay_inventory(&self, inv: InvVect, payload: &RelayPayload) {
        self.relayed.lock().push(inv);
        let peers = self.peers.lock().clone();
        relay_to_peers(&peers, inv, payload);
    }

    fn transaction_confirmed(&self, tx: &Transaction) {
        self.confirmed.lock().push(tx.txid());
    }
}

/// Forwards the manager's fee signals to a real estimator.
pub struct EstimatorSink(pub tern_mempool::FeeEstimator);

impl FeeSink for EstimatorSink {
    fn observe_transaction(&self, txid: Hash, fee_per_kb: i64) {
        self.0.observe_transaction(txid, fee_per_kb);
    }

    fn register_block(&self, height: u32, confirmed: &[Hash]) {
        self.0.register_block(height, confirmed);
    }
}

/// A scripted remote peer: a handle plus helpers to observe what the node
/// sends it.
pub struct TestPeer {
    /// The shared handle the manager sees.
    pub handle: Arc<PeerHandle>,
}

impl TestPeer {
    /// A full-node sync candidate at the given height.
    pub fn new(id: i32, height: u32) -> Self {
        Self {
            handle: Arc::new(PeerHandle::new(
                PeerId(id),
                ServiceFlags::NETWORK | ServiceFlags::BLOOM,
                PROTOCOL_VERSION,
                height,
                true,
            )),
        }
    }

    /// A light peer: not a sync candidate, no bloom service.
    pub fn light(id: i32) -> Self {
        Self {
            handle: Arc::new(PeerHandle::new(
                PeerId(id),
                ServiceFlags::NONE,
                PROTOCOL_VERSION,
                0,
                false,
            )),
        }
    }

    /// This peer's ID.
    pub fn id(&self) -> PeerId {
        self.handle.id()
    }

    /// Next message the node queued for this peer, within a short deadline.
    pub async fn expect_message(&self) -> Message {
        timeout(Duration::from_secs(5), self.handle.next_message())
            .await
            .expect("timed out waiting for outbound message")
            .expect("peer outbound queue closed")
    }

    /// Expect a `getheaders` and return its locator and stop hash.
    pub async fn expect_get_headers(&self) -> (BlockLocator, Hash) {
        match self.expect_message().await {
            Message::GetHeaders { locator, stop_hash } => (locator, stop_hash),
            other => panic!("expected getheaders, got {}", other.command()),
        }
    }

    /// Expect a `getdata` and return its inventory.
    pub async fn expect_get_data(&self) -> Vec<InvVect> {
        match self.expect_message().await {
            Message::GetData(inv) => inv,
            other => panic!("expected getdata, got {}", other.command()),
        }
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.handle.try_next_message() {
            messages.push(message);
        }
        messages
    }

    /// Assert nothing is queued.
    pub fn assert_no_message(&self) {
        if let Some(message) = self.handle.try_next_message() {
            panic!("unexpected outbound message: {}", message.command());
        }
    }
}

/// A running sync manager over in-memory collaborators.
pub struct TestNode {
    /// Handle to the running manager.
    pub handle: SyncHandle,
    /// The fake validator.
    pub chain: Arc<MemChain>,
    /// The pool adapter.
    pub pool: Arc<PoolAdapter>,
    /// The notification recorder.
    pub notifier: Arc<RecordingNotifier>,
    /// The fee estimator fed by the manager.
    pub estimator: Arc<EstimatorSink>,
}

impl TestNode {
    /// A node with default tuning and no checkpoints.
    pub fn new() -> Self {
        Self::with_config(Vec::new(), Tuning::default())
    }

    /// A node with embedded checkpoints.
    pub fn with_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        Self::with_config(checkpoints, Tuning::default())
    }

    /// Full control over checkpoints and tuning.
    pub fn with_config(checkpoints: Vec<Checkpoint>, tuning: Tuning) -> Self {
        let chain = Arc::new(MemChain::new());
        let pool = Arc::new(PoolAdapter::new(chain.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let params = Arc::new(ChainParams {
            name: "terntest",
            genesis_hash: genesis_block().block_hash(),
            pow_limit_bits: EASY_POW_BITS,
            checkpoints,
        });

        let estimator = Arc::new(EstimatorSink(tern_mempool::FeeEstimator::new()));
        let config = Config {
            notifier: notifier.clone(),
            chain: chain.clone(),
            mempool: pool.clone(),
            params,
            disable_checkpoints: false,
            max_peers: 32,
            fee_estimator: Some(estimator.clone()),
            tuning,
        };

        let handle = SyncManager::new(config).start();
        Self {
            handle,
            chain,
            pool,
            notifier,
            estimator,
        }
    }

    /// Register the peer with relay and hand it to the manager.
    pub async fn connect(&self, peer: &TestPeer) {
        self.notifier.register_peer(peer.handle.clone());
        self.handle
            .new_peer(peer.handle.clone())
            .await
            .expect("manager is running");
    }

    /// Wait until every previously enqueued event has been processed.
    ///
    /// Works because the intake is a single FIFO: a round-tripped query
    /// cannot be answered before earlier events are handled.
    pub async fn barrier(&self) {
        let _ = self.handle.sync_peer_id().await;
    }

    /// Current sync peer ID (0 when none).
    pub async fn sync_peer(&self) -> i32 {
        self.handle.sync_peer_id().await.expect("manager is running")
    }

    /// Submit a transaction and wait for it to be fully processed.
    pub async fn send_tx(&self, tx: Transaction, peer: &TestPeer) {
        let (done, done_rx) = tokio::sync::oneshot::channel();
        self.handle
            .queue_tx(tx, peer.id(), Some(done))
            .await
            .expect("manager is running");
        done_rx.await.expect("tx event dropped");
    }

    /// Submit a block and wait for it to be fully processed.
    pub async fn send_block(&self, block: Block, peer: &TestPeer) {
        let (done, done_rx) = tokio::sync::oneshot::channel();
        self.handle
            .queue_block(block, peer.id(), Some(done))
            .await
            .expect("manager is running");
        done_rx.await.expect("block event dropped");
    }

    /// Answer the peer's getdata requests from the given block set until the
    /// chain reaches the set's highest block.
    pub async fn serve_blocks(&self, peer: &TestPeer, blocks: &[Block]) {
        let by_hash: HashMap<Hash, Block> =
            blocks.iter().map(|b| (b.block_hash(), b.clone())).collect();
        let target = self.chain.height() + blocks.len() as u32;

        while self.chain.height() < target {
            if let Message::GetData(invs) = peer.expect_message().await {
                for iv in invs {
                    let block = by_hash
                        .get(&iv.hash)
                        .unwrap_or_else(|| panic!("asked for unknown block {}", iv.hash))
                        .clone();
                    self.send_block(block, peer).await;
                }
            }
        }
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}
