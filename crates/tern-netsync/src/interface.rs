//! Collaborator seams consumed by the sync manager.
//!
//! The validator, the memory pool, and the surrounding node are external
//! collaborators: the manager drives them only through the traits defined
//! here and never reaches into their internals.

use crate::peer::{PeerHandle, PeerId};
use crate::{
    DEFAULT_BLOCK_DOWNLOAD_WINDOW, DEFAULT_MAX_KNOWN_INVENTORY, DEFAULT_MAX_ORPHAN_TRANSACTIONS,
    DEFAULT_MAX_PEERS, DEFAULT_MAX_REJECTED_TXNS, DEFAULT_ORPHAN_EXPIRE_SCAN_INTERVAL,
    DEFAULT_ORPHAN_TTL, DEFAULT_STALL_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use tern_wire::{
    Block, BlockHeader, BlockLocator, Hash, InvVect, Transaction,
};
use thiserror::Error;

/// Snapshot of the validator's best chain state.
#[derive(Debug, Clone, Copy)]
pub struct ChainSnapshot {
    /// Hash of the best block.
    pub hash: Hash,
    /// Height of the best block.
    pub height: u32,
    /// Timestamp of the best block.
    pub timestamp: u64,
}

/// Flags modifying how the validator treats a submitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BehaviorFlags {
    /// Skip expensive script/signature validation. Only set for blocks under
    /// a trusted checkpoint during initial sync.
    pub fast_add: bool,
}

impl BehaviorFlags {
    /// Full validation.
    pub const NONE: BehaviorFlags = BehaviorFlags { fast_add: false };
    /// Checkpointed fast path.
    pub const FAST_ADD: BehaviorFlags = BehaviorFlags { fast_add: true };
}

/// A hard-coded trusted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Height of the trusted block.
    pub height: u32,
    /// Its hash.
    pub hash: Hash,
}

/// Chain-wide constants consumed at construction.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Human-readable network name.
    pub name: &'static str,
    /// Hash of the genesis block.
    pub genesis_hash: Hash,
    /// Compact-encoded easiest allowed proof-of-work target.
    pub pow_limit_bits: u32,
    /// Trusted checkpoints, ascending by height.
    pub checkpoints: Vec<Checkpoint>,
}

impl ChainParams {
    /// The highest checkpoint, if any are embedded.
    pub fn final_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// The first checkpoint strictly above `height`.
    pub fn next_checkpoint(&self, height: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.height > height)
    }
}

/// Errors surfaced by the validator.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The block is already known.
    #[error("duplicate block {0}")]
    Duplicate(Hash),

    /// The block violated a consensus rule.
    #[error("rule violation: {reason}")]
    Rule {
        reason: String,
        /// True when the violation can only come from a malicious encoder.
        malicious: bool,
    },

    /// The validator itself failed (disk, corruption).
    #[error("validator internal error: {0}")]
    Internal(String),
}

/// The block-chain validator seam.
///
/// Consensus rules, the UTXO set, and reorg handling live behind this trait;
/// calls are expected to be synchronous and fast relative to network I/O.
pub trait Chain: Send + Sync {
    /// Best-chain tip snapshot.
    fn best_snapshot(&self) -> ChainSnapshot;

    /// Whether the block is already known (main chain, side chain, or held
    /// as a chain orphan).
    fn have_block(&self, hash: &Hash) -> bool;

    /// Height of a main-chain block, if present.
    fn block_height(&self, hash: &Hash) -> Option<u32>;

    /// Locator over the best chain, tip first.
    fn block_locator(&self) -> BlockLocator;

    /// Submit a block for full validation and connection.
    ///
    /// Returns whether the block was held as an orphan (parent unknown).
    fn process_block(&self, block: &Block, flags: BehaviorFlags) -> Result<bool, ChainError>;

    /// Fetch a main-chain block for serving.
    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;

    /// Headers after the locator fork point, up to `stop_hash` or the
    /// per-message limit.
    fn headers_after(&self, locator: &BlockLocator, stop_hash: &Hash) -> Vec<BlockHeader>;

    /// Main-chain block hashes after the locator fork point.
    fn block_hashes_after(&self, locator: &BlockLocator, stop_hash: &Hash, max: usize)
        -> Vec<Hash>;

    /// Whether a transaction is confirmed in the main chain.
    fn transaction_in_chain(&self, txid: &Hash) -> bool;

    /// The validator's own view of recency: the tip is close enough to
    /// wall-clock time to be considered caught up.
    fn is_current(&self) -> bool;
}

/// A transaction accepted into the memory pool.
#[derive(Debug, Clone)]
pub struct TxAcceptance {
    /// Identity of the accepted transaction.
    pub txid: Hash,
    /// The transaction itself, for relay filtering.
    pub tx: Transaction,
    /// Fee rate in base units per kilobyte, for fee-filter suppression.
    pub fee_per_kb: i64,
}

/// A classified memory-pool rejection.
#[derive(Error, Debug)]
pub enum TxRejection {
    /// Already known; silently dropped.
    #[error("duplicate transaction")]
    Duplicate,

    /// Inputs reference unknown transactions; candidate for the orphan pool.
    #[error("missing {} parent transactions", .0.len())]
    MissingInputs(Vec<Hash>),

    /// Violates relay policy (fee floor, size); dropped without punishment.
    #[error("policy rejection: {0}")]
    Policy(String),

    /// Malicious encoding or forged proof of work; the source is banned.
    #[error("malicious transaction: {0}")]
    Malicious(String),
}

/// The memory-pool seam.
pub trait TxMemPool: Send + Sync {
    /// Whether the pool already holds the transaction.
    fn contains(&self, txid: &Hash) -> bool;

    /// Validate and admit a transaction.
    fn accept_transaction(&self, tx: &Transaction) -> Result<TxAcceptance, TxRejection>;

    /// Fetch a pooled transaction for serving.
    fn fetch_transaction(&self, txid: &Hash) -> Option<Transaction>;

    /// A block connected: drop its transactions and anything they conflict
    /// with. Returns the IDs that were actually resident.
    fn confirmed_block(&self, block: &Block) -> Vec<Hash>;

    /// Pool inventory at or above a fee rate, for `mempool` requests.
    fn inventory_above(&self, min_fee_per_kb: i64) -> Vec<Hash>;

    /// Number of resident transactions.
    fn count(&self) -> usize;
}

/// Payload attached to a relayed inventory vector.
#[derive(Debug, Clone)]
pub enum RelayPayload {
    /// A newly connected block's header.
    Block(BlockHeader),
    /// A newly accepted transaction.
    Tx(TxAcceptance),
}

/// Outbound notifications implemented by the surrounding node.
pub trait PeerNotifier: Send + Sync {
    /// Relay newly accepted mempool transactions.
    fn announce_new_transactions(&self, txs: &[TxAcceptance]);

    /// Tell connected peers (except the source) about a new tip.
    fn update_peer_heights(&self, hash: &Hash, height: u32, source: Option<PeerId>);

    /// Relay inventory to connected peers, respecting each peer's known
    /// inventory, bloom filter, and fee filter.
    fn relay_inventory(&self, inv: InvVect, payload: &RelayPayload);

    /// A mempool transaction was confirmed by a connected block.
    fn transaction_confirmed(&self, tx: &Transaction);
}

/// Fee-estimation sink fed by the manager.
pub trait FeeSink: Send + Sync {
    /// A transaction entered the pool at the current height.
    fn observe_transaction(&self, txid: Hash, fee_per_kb: i64);

    /// A block connected at `height`, confirming `confirmed` pool entries.
    fn register_block(&self, height: u32, confirmed: &[Hash]);
}

/// Tunable constants. Defaults are conservative; all knobs exist because the
/// right values are deployment-specific.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Deadline for a peer's next expected response.
    pub stall_timeout: Duration,
    /// How often stall deadlines are checked.
    pub stall_tick: Duration,
    /// Outstanding block requests kept toward the sync peer.
    pub block_download_window: usize,
    /// Orphan transaction pool capacity.
    pub max_orphan_txs: usize,
    /// Orphan lifetime before the coarse expiry sweep removes it.
    pub orphan_ttl: Duration,
    /// Interval of the orphan expiry sweep.
    pub orphan_expire_scan_interval: Duration,
    /// Per-peer known-inventory memory.
    pub max_known_inventory: usize,
    /// Recent-reject cache capacity.
    pub max_rejected_txns: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            stall_tick: Duration::from_secs(1),
            block_download_window: DEFAULT_BLOCK_DOWNLOAD_WINDOW,
            max_orphan_txs: DEFAULT_MAX_ORPHAN_TRANSACTIONS,
            orphan_ttl: DEFAULT_ORPHAN_TTL,
            orphan_expire_scan_interval: DEFAULT_ORPHAN_EXPIRE_SCAN_INTERVAL,
            max_known_inventory: DEFAULT_MAX_KNOWN_INVENTORY,
            max_rejected_txns: DEFAULT_MAX_REJECTED_TXNS,
        }
    }
}

/// Configuration consumed once at construction. The core reads no
/// environment variables and no files.
pub struct Config {
    /// Outbound notification sink.
    pub notifier: Arc<dyn PeerNotifier>,
    /// The validator.
    pub chain: Arc<dyn Chain>,
    /// The memory pool.
    pub mempool: Arc<dyn TxMemPool>,
    /// Chain constants.
    pub params: Arc<ChainParams>,
    /// Ignore embedded checkpoints entirely.
    pub disable_checkpoints: bool,
    /// Maximum tracked peers.
    pub max_peers: usize,
    /// Optional fee-estimation sink.
    pub fee_estimator: Option<Arc<dyn FeeSink>>,
    /// Tunables.
    pub tuning: Tuning,
}

impl Config {
    /// Minimal configuration over the three mandatory collaborators.
    pub fn new(
        notifier: Arc<dyn PeerNotifier>,
        chain: Arc<dyn Chain>,
        mempool: Arc<dyn TxMemPool>,
        params: Arc<ChainParams>,
    ) -> Self {
        Self {
            notifier,
            chain,
            mempool,
            params,
            disable_checkpoints: false,
            max_peers: DEFAULT_MAX_PEERS,
            fee_estimator: None,
            tuning: Tuning::default(),
        }
    }
}

/// Suppression-aware inventory relay over a set of peer handles.
///
/// This is the walk a node's [`PeerNotifier::relay_inventory`] performs: a
/// peer sees the announcement only if the item is not already in its known
/// inventory, its fee filter admits the fee rate, and its bloom filter (when
/// loaded) matches the transaction.
pub fn relay_to_peers(peers: &[Arc<PeerHandle>], inv: InvVect, payload: &RelayPayload) {
    for peer in peers {
        if peer.is_disconnect_pending() {
            continue;
        }
        if let RelayPayload::Tx(acceptance) = payload {
            if acceptance.fee_per_kb < peer.fee_filter() {
                continue;
            }
            if !peer.filter_matches(&acceptance.tx) {
                continue;
            }
        }
        peer.queue_inventory(inv);
    }
}
