//! Manager-owned bookkeeping: per-peer sync state, the global requested map,
//! and the node-wide sync phase.

use crate::peer::PeerId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tern_wire::{Hash, InvVect};
use tokio::time::Instant;

/// Where the node stands in the synchronization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No sync peer selected.
    Discovering,
    /// Downloading the header chain from the sync peer.
    SyncingHeaders,
    /// Downloading block bodies scheduled by the header chain.
    SyncingBlocks,
    /// Caught up; blocks are fetched as announced.
    Current,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Discovering => write!(f, "discovering"),
            SyncPhase::SyncingHeaders => write!(f, "syncing headers"),
            SyncPhase::SyncingBlocks => write!(f, "syncing blocks"),
            SyncPhase::Current => write!(f, "current"),
        }
    }
}

/// Per-peer sync bookkeeping, owned exclusively by the decision task.
#[derive(Debug)]
pub struct PeerSyncState {
    /// Transactions requested from this peer and not yet received.
    pub requested_txns: HashSet<Hash>,
    /// Blocks requested from this peer and not yet received.
    pub requested_blocks: HashSet<Hash>,
    /// Eligible to serve as the authoritative chain source.
    pub sync_candidate: bool,
    /// Deadline for the peer's next expected response; None when the peer
    /// owes us nothing.
    pub stall_deadline: Option<Instant>,
    /// Latest block header this peer has announced.
    pub last_announced_block: Option<Hash>,
    /// Accumulated misbehavior score.
    pub misbehavior: u32,
    /// Set once the peer has been banned.
    pub banned: bool,
}

impl PeerSyncState {
    /// Fresh state for a newly connected peer.
    pub fn new(sync_candidate: bool) -> Self {
        Self {
            requested_txns: HashSet::new(),
            requested_blocks: HashSet::new(),
            sync_candidate,
            stall_deadline: None,
            last_announced_block: None,
            misbehavior: 0,
            banned: false,
        }
    }

    /// Whether the peer owes us any response.
    pub fn has_outstanding_requests(&self) -> bool {
        !self.requested_txns.is_empty() || !self.requested_blocks.is_empty()
    }
}

/// Node-wide map from inventory fingerprint to the peer tasked with
/// supplying it.
///
/// Enforces the invariant that each fingerprint has at most one in-flight
/// request across all peers.
#[derive(Debug, Default)]
pub struct RequestedMap {
    map: HashMap<InvVect, PeerId>,
}

impl RequestedMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a fingerprint for a peer. Returns false when another request is
    /// already in flight.
    pub fn try_claim(&mut self, inv: InvVect, peer: PeerId) -> bool {
        match self.map.entry(inv) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(peer);
                true
            }
        }
    }

    /// Whether a request for the fingerprint is in flight anywhere.
    pub fn contains(&self, inv: &InvVect) -> bool {
        self.map.contains_key(inv)
    }

    /// The peer currently tasked with the fingerprint.
    pub fn claimed_by(&self, inv: &InvVect) -> Option<PeerId> {
        self.map.get(inv).copied()
    }

    /// Release one fingerprint, returning who held it.
    pub fn release(&mut self, inv: &InvVect) -> Option<PeerId> {
        self.map.remove(inv)
    }

    /// Release every fingerprint held by a peer, so the items can be
    /// re-requested elsewhere. Returns the released fingerprints.
    pub fn release_peer(&mut self, peer: PeerId) -> Vec<InvVect> {
        let released: Vec<InvVect> = self
            .map
            .iter()
            .filter(|(_, holder)| **holder == peer)
            .map(|(inv, _)| *inv)
            .collect();
        for inv in &released {
            self.map.remove(inv);
        }
        released
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
