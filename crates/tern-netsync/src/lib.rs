//! # tern-netsync
//!
//! Block and transaction synchronization engine for the Tern chain.
//!
//! The engine orchestrates many concurrent peer connections into a single
//! coherent act of downloading, validating, and serving chain data while the
//! mempool and relay continue in parallel. It provides:
//! - A single-actor decision loop over one ordered event queue
//! - Headers-first initial sync with a parallel block-download window
//! - Sync-peer selection with stall detection and re-selection
//! - Inventory dedup, request tracking, and relay suppression
//! - A mempool gateway with orphan bookkeeping and a recent-reject cache
//! - Checkpoint-aware fast-add validation during initial sync
//!
//! It does not validate consensus rules, persist blocks, frame network
//! bytes, or manage TCP connections; those live behind the [`Chain`],
//! [`TxMemPool`], and [`PeerNotifier`] seams.

mod ban;
mod error;
mod event;
mod headers;
mod interface;
mod lru;
mod manager;
mod orphans;
mod peer;
mod state;

pub use ban::{MisbehaviorReason, BAN_THRESHOLD};
pub use error::{SyncError, SyncResult};
pub use event::SyncEvent;
pub use headers::{HeaderChain, HeaderError, HeaderNode};
pub use interface::{
    relay_to_peers, BehaviorFlags, Chain, ChainError, ChainParams, ChainSnapshot, Checkpoint,
    Config, FeeSink, PeerNotifier, RelayPayload, Tuning, TxAcceptance, TxMemPool, TxRejection,
};
pub use lru::LruSet;
pub use manager::{SyncHandle, SyncManager};
pub use orphans::{OrphanPool, OrphanTx};
pub use peer::{PeerHandle, PeerId, OUTBOUND_QUEUE_CAPACITY};
pub use state::{PeerSyncState, RequestedMap, SyncPhase};

use std::time::Duration;

/// Default deadline for a peer's next expected response.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of outstanding block requests toward the sync peer.
pub const DEFAULT_BLOCK_DOWNLOAD_WINDOW: usize = 16;

/// Default orphan transaction pool capacity.
pub const DEFAULT_MAX_ORPHAN_TRANSACTIONS: usize = 100;

/// Default orphan lifetime.
pub const DEFAULT_ORPHAN_TTL: Duration = Duration::from_secs(15 * 60);

/// Default interval of the coarse orphan expiry sweep.
pub const DEFAULT_ORPHAN_EXPIRE_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default per-peer known-inventory memory.
pub const DEFAULT_MAX_KNOWN_INVENTORY: usize = 1000;

/// Default recent-reject cache capacity.
pub const DEFAULT_MAX_REJECTED_TXNS: usize = 1000;

/// Default maximum tracked peers.
pub const DEFAULT_MAX_PEERS: usize = 125;

/// Oldest protocol version a sync peer may speak.
pub const MIN_SYNC_PEER_VERSION: u32 = 2;

/// Maximum block hashes returned for one `getblocks` request.
pub const MAX_BLOCKS_PER_GETBLOCKS: usize = 500;
