//! Typed events consumed by the decision loop.

use crate::interface::BehaviorFlags;
use crate::peer::{PeerHandle, PeerId};
use crate::SyncResult;
use std::sync::Arc;
use tern_wire::{Block, BlockHeader, BlockLocator, FilterLoad, Hash, InvVect, Transaction};
use tokio::sync::oneshot;

/// An event entering the sync manager's single ordered queue.
///
/// Producers are the per-peer connection tasks and the surrounding node;
/// delivery is FIFO per producer, and the manager processes events strictly
/// one at a time. This is the sole serialization point for all sync state.
#[derive(Debug)]
pub enum SyncEvent {
    /// A peer completed its handshake.
    NewPeer { peer: Arc<PeerHandle> },
    /// A peer's connection went away.
    DonePeer { peer: PeerId },
    /// `tx` message.
    Tx {
        tx: Transaction,
        peer: PeerId,
        done: Option<oneshot::Sender<()>>,
    },
    /// `block` message.
    Block {
        block: Block,
        peer: PeerId,
        done: Option<oneshot::Sender<()>>,
    },
    /// `inv` message.
    Inv { inv: Vec<InvVect>, peer: PeerId },
    /// `headers` message.
    Headers {
        headers: Vec<BlockHeader>,
        peer: PeerId,
    },
    /// `notfound` message.
    NotFound { inv: Vec<InvVect>, peer: PeerId },
    /// `getdata` message: the peer wants items served.
    GetData { inv: Vec<InvVect>, peer: PeerId },
    /// `getblocks` message: the peer wants block inventory after a locator.
    GetBlocks {
        locator: BlockLocator,
        stop_hash: Hash,
        peer: PeerId,
    },
    /// `getheaders` message.
    GetHeaders {
        locator: BlockLocator,
        stop_hash: Hash,
        peer: PeerId,
    },
    /// `mempool` message: the peer wants our pool inventory.
    MempoolRequest { peer: PeerId },
    /// `filterload` message.
    FilterLoad { load: FilterLoad, peer: PeerId },
    /// `filteradd` message.
    FilterAdd { data: Vec<u8>, peer: PeerId },
    /// `filterclear` message.
    FilterClear { peer: PeerId },
    /// `feefilter` message.
    FeeFilter { min_fee_per_kb: i64, peer: PeerId },
    /// Caller-driven block injection (mining / RPC path).
    ProcessBlock {
        block: Block,
        flags: BehaviorFlags,
        reply: oneshot::Sender<SyncResult<bool>>,
    },
    /// Query: is the local chain caught up with the best known peer tip?
    IsCurrent { reply: oneshot::Sender<bool> },
    /// Query: the current sync peer's ID (0 when none).
    SyncPeerId { reply: oneshot::Sender<i32> },
    /// Suspend intake until the returned sender is dropped or signalled.
    Pause { resume: oneshot::Receiver<()> },
    /// Drain and exit the decision task.
    Stop,
}
