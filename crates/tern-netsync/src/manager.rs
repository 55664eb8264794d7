//! The sync manager: a single decision task multiplexing every peer and the
//! validator onto one ordered event queue.
//!
//! Peer I/O tasks run in parallel but communicate with the core exclusively
//! by enqueueing [`SyncEvent`]s; the decision task exclusively owns the peer
//! state table, the requested map, the header chain, and the orphan pool, so
//! none of them need locks.

use crate::ban::{MisbehaviorReason, BAN_THRESHOLD};
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use crate::headers::HeaderChain;
use crate::interface::{
    BehaviorFlags, Chain, ChainError, ChainParams, Checkpoint, Config, FeeSink, PeerNotifier,
    RelayPayload, Tuning, TxMemPool, TxRejection,
};
use crate::lru::LruSet;
use crate::orphans::OrphanPool;
use crate::peer::{PeerHandle, PeerId};
use crate::state::{PeerSyncState, RequestedMap, SyncPhase};
use crate::MAX_BLOCKS_PER_GETBLOCKS;
use num_bigint::BigUint;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tern_wire::{
    compact_to_target, Block, BlockHeader, BlockLocator, BloomFilter, FilterLoad, Hash, InvVect,
    MerkleBlock, Message, Transaction, MAX_FILTER_ADD_SIZE, MAX_HEADERS_PER_MSG, MAX_INV_PER_MSG,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// One tracked peer: the shared handle plus manager-owned sync state.
struct PeerCtx {
    handle: Arc<PeerHandle>,
    state: PeerSyncState,
}

/// Handle to a running sync manager.
///
/// Cloneable; every producer (peer tasks, RPC, the node itself) submits
/// events through it. After [`SyncHandle::stop`] every submission returns
/// [`SyncError::Shutdown`].
#[derive(Clone)]
pub struct SyncHandle {
    events: mpsc::Sender<SyncEvent>,
    shutdown: Arc<AtomicBool>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncHandle {
    async fn submit(&self, event: SyncEvent) -> SyncResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SyncError::Shutdown);
        }
        self.events
            .send(event)
            .await
            .map_err(|_| SyncError::Shutdown)
    }

    /// A peer completed its handshake.
    pub async fn new_peer(&self, peer: Arc<PeerHandle>) -> SyncResult<()> {
        self.submit(SyncEvent::NewPeer { peer }).await
    }

    /// A peer's connection went away.
    pub async fn done_peer(&self, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::DonePeer { peer }).await
    }

    /// Submit a `tx` message. `done` is signalled once the transaction has
    /// been fully processed, for producer backpressure.
    pub async fn queue_tx(
        &self,
        tx: Transaction,
        peer: PeerId,
        done: Option<oneshot::Sender<()>>,
    ) -> SyncResult<()> {
        self.submit(SyncEvent::Tx { tx, peer, done }).await
    }

    /// Submit a `block` message.
    pub async fn queue_block(
        &self,
        block: Block,
        peer: PeerId,
        done: Option<oneshot::Sender<()>>,
    ) -> SyncResult<()> {
        self.submit(SyncEvent::Block { block, peer, done }).await
    }

    /// Submit an `inv` message.
    pub async fn queue_inv(&self, inv: Vec<InvVect>, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::Inv { inv, peer }).await
    }

    /// Submit a `headers` message.
    pub async fn queue_headers(&self, headers: Vec<BlockHeader>, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::Headers { headers, peer }).await
    }

    /// Submit a `notfound` message.
    pub async fn queue_not_found(&self, inv: Vec<InvVect>, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::NotFound { inv, peer }).await
    }

    /// Submit a `getdata` message.
    pub async fn queue_get_data(&self, inv: Vec<InvVect>, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::GetData { inv, peer }).await
    }

    /// Submit a `getblocks` message.
    pub async fn queue_get_blocks(
        &self,
        locator: BlockLocator,
        stop_hash: Hash,
        peer: PeerId,
    ) -> SyncResult<()> {
        self.submit(SyncEvent::GetBlocks {
            locator,
            stop_hash,
            peer,
        })
        .await
    }

    /// Submit a `getheaders` message.
    pub async fn queue_get_headers(
        &self,
        locator: BlockLocator,
        stop_hash: Hash,
        peer: PeerId,
    ) -> SyncResult<()> {
        self.submit(SyncEvent::GetHeaders {
            locator,
            stop_hash,
            peer,
        })
        .await
    }

    /// Submit a `mempool` request.
    pub async fn queue_mempool(&self, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::MempoolRequest { peer }).await
    }

    /// Submit a `filterload` message.
    pub async fn queue_filter_load(&self, load: FilterLoad, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::FilterLoad { load, peer }).await
    }

    /// Submit a `filteradd` message.
    pub async fn queue_filter_add(&self, data: Vec<u8>, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::FilterAdd { data, peer }).await
    }

    /// Submit a `filterclear` message.
    pub async fn queue_filter_clear(&self, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::FilterClear { peer }).await
    }

    /// Submit a `feefilter` message.
    pub async fn queue_fee_filter(&self, min_fee_per_kb: i64, peer: PeerId) -> SyncResult<()> {
        self.submit(SyncEvent::FeeFilter {
            min_fee_per_kb,
            peer,
        })
        .await
    }

    /// Inject a block from outside the peer network (mining, RPC).
    ///
    /// Returns whether the validator held the block as an orphan.
    pub async fn process_block(&self, block: Block, flags: BehaviorFlags) -> SyncResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(SyncEvent::ProcessBlock {
            block,
            flags,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Whether the local tip is caught up with the best known peer tip.
    pub async fn is_current(&self) -> SyncResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(SyncEvent::IsCurrent { reply }).await?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// ID of the current sync peer; 0 when none.
    pub async fn sync_peer_id(&self) -> SyncResult<i32> {
        let (reply, rx) = oneshot::channel();
        self.submit(SyncEvent::SyncPeerId { reply }).await?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// Suspend event intake. Intake resumes when the returned sender is
    /// signalled or dropped.
    pub async fn pause(&self) -> SyncResult<oneshot::Sender<()>> {
        let (resume_tx, resume_rx) = oneshot::channel();
        self.submit(SyncEvent::Pause { resume: resume_rx }).await?;
        Ok(resume_tx)
    }

    /// Drain the queue up to the current event and shut the manager down.
    /// Subsequent submissions fail with [`SyncError::Shutdown`]; pending
    /// queries receive a shutting-down reply.
    pub async fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.events.send(SyncEvent::Stop).await;
        let join = self.join.lock().await.take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

/// The block/transaction synchronization engine.
pub struct SyncManager {
    notifier: Arc<dyn PeerNotifier>,
    chain: Arc<dyn Chain>,
    mempool: Arc<dyn TxMemPool>,
    params: Arc<ChainParams>,
    fee_estimator: Option<Arc<dyn FeeSink>>,
    tuning: Tuning,
    disable_checkpoints: bool,
    max_peers: usize,
    pow_limit: BigUint,

    /// Peer table, keyed by ID. BTreeMap keeps iteration deterministic so
    /// sync-peer selection is by insertion (ID) order.
    peers: std::collections::BTreeMap<i32, PeerCtx>,
    sync_peer: Option<i32>,
    phase: SyncPhase,
    header_chain: HeaderChain,
    /// Blocks that arrived out of order, waiting for their turn.
    pending_blocks: HashMap<Hash, Block>,
    requested: RequestedMap,
    orphans: OrphanPool,
    /// Recently rejected transactions, so bad data is not re-fetched.
    rejected: LruSet<Hash>,
}

impl SyncManager {
    /// Build a manager over its collaborators. Nothing runs until
    /// [`SyncManager::start`].
    pub fn new(config: Config) -> Self {
        let Config {
            notifier,
            chain,
            mempool,
            params,
            disable_checkpoints,
            max_peers,
            fee_estimator,
            tuning,
        } = config;

        let pow_limit = compact_to_target(params.pow_limit_bits);
        let orphans = OrphanPool::new(tuning.max_orphan_txs, tuning.orphan_ttl);
        let rejected = LruSet::new(tuning.max_rejected_txns);

        Self {
            notifier,
            chain,
            mempool,
            params,
            fee_estimator,
            tuning,
            disable_checkpoints,
            max_peers,
            pow_limit,
            peers: std::collections::BTreeMap::new(),
            sync_peer: None,
            phase: SyncPhase::Discovering,
            header_chain: HeaderChain::new(),
            pending_blocks: HashMap::new(),
            requested: RequestedMap::new(),
            orphans,
            rejected,
        }
    }

    /// Spawn the decision task and return the handle producers use.
    pub fn start(self) -> SyncHandle {
        let capacity = (self.max_peers * 3).max(128);
        let (events, rx) = mpsc::channel(capacity);
        let join = tokio::spawn(self.run(rx));
        SyncHandle {
            events,
            shutdown: Arc::new(AtomicBool::new(false)),
            join: Arc::new(Mutex::new(Some(join))),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SyncEvent>) {
        info!(network = self.params.name, "sync manager started");

        let mut stall_tick = interval(self.tuning.stall_tick);
        stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut orphan_tick = interval(self.tuning.orphan_expire_scan_interval);
        orphan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                event = rx.recv() => {
                    match event {
                        None | Some(SyncEvent::Stop) => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
                _ = stall_tick.tick() => self.check_stalls(),
                _ = orphan_tick.tick() => self.expire_orphans(),
            }
        }

        // Reject everything enqueued behind the stop marker.
        rx.close();
        while let Ok(event) = rx.try_recv() {
            Self::reject_event(event);
        }
        info!("sync manager stopped");
    }

    async fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::NewPeer { peer } => self.handle_new_peer(peer),
            SyncEvent::DonePeer { peer } => self.handle_done_peer(peer),
            SyncEvent::Tx { tx, peer, done } => {
                self.handle_tx(tx, peer);
                ack(done);
            }
            SyncEvent::Block { block, peer, done } => {
                self.handle_block(block, peer);
                ack(done);
            }
            SyncEvent::Inv { inv, peer } => self.handle_inv(inv, peer),
            SyncEvent::Headers { headers, peer } => self.handle_headers(headers, peer),
            SyncEvent::NotFound { inv, peer } => self.handle_not_found(inv, peer),
            SyncEvent::GetData { inv, peer } => self.handle_get_data(inv, peer),
            SyncEvent::GetBlocks {
                locator,
                stop_hash,
                peer,
            } => self.handle_get_blocks(locator, stop_hash, peer),
            SyncEvent::GetHeaders {
                locator,
                stop_hash,
                peer,
            } => self.handle_get_headers(locator, stop_hash, peer),
            SyncEvent::MempoolRequest { peer } => self.handle_mempool_request(peer),
            SyncEvent::FilterLoad { load, peer } => self.handle_filter_load(load, peer),
            SyncEvent::FilterAdd { data, peer } => self.handle_filter_add(data, peer),
            SyncEvent::FilterClear { peer } => self.handle_filter_clear(peer),
            SyncEvent::FeeFilter {
                min_fee_per_kb,
                peer,
            } => self.handle_fee_filter(min_fee_per_kb, peer),
            SyncEvent::ProcessBlock {
                block,
                flags,
                reply,
            } => {
                let result = self.handle_process_block(block, flags);
                let _ = reply.send(result);
            }
            SyncEvent::IsCurrent { reply } => {
                let _ = reply.send(self.current_state());
            }
            SyncEvent::SyncPeerId { reply } => {
                let _ = reply.send(self.sync_peer.unwrap_or(0));
            }
            SyncEvent::Pause { resume } => {
                info!("sync manager paused");
                let _ = resume.await;
                info!("sync manager resumed");
            }
            SyncEvent::Stop => unreachable!("Stop is consumed by the run loop"),
        }
    }

    fn reject_event(event: SyncEvent) {
        match event {
            SyncEvent::ProcessBlock { reply, .. } => {
                let _ = reply.send(Err(SyncError::Shutdown));
            }
            SyncEvent::IsCurrent { reply } => {
                let _ = reply.send(false);
            }
            SyncEvent::SyncPeerId { reply } => {
                let _ = reply.send(0);
            }
            // Dropping the ack sinks signals shutdown to waiting producers.
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------

    fn handle_new_peer(&mut self, peer: Arc<PeerHandle>) {
        if self.peers.len() >= self.max_peers {
            warn!(peer = %peer.id(), max = self.max_peers, "peer table full, refusing peer");
            peer.disconnect();
            return;
        }

        let id = peer.id();
        let candidate = peer.is_sync_candidate();
        info!(
            peer = %id,
            height = peer.height(),
            candidate,
            outbound = peer.is_outbound(),
            "new sync peer"
        );

        self.peers.insert(
            id.0,
            PeerCtx {
                handle: peer,
                state: PeerSyncState::new(candidate),
            },
        );
        self.select_sync_peer();
    }

    fn handle_done_peer(&mut self, peer: PeerId) {
        if !self.peers.contains_key(&peer.0) {
            debug!(peer = %peer, "done for unknown peer");
            return;
        }

        self.release_peer_requests(peer);
        self.peers.remove(&peer.0);
        info!(peer = %peer, remaining = self.peers.len(), "peer done");

        if self.sync_peer == Some(peer.0) {
            self.sync_peer = None;
            self.select_sync_peer();
        }
    }

    /// Pick the sync peer: the first (by ID order) candidate whose reported
    /// height is at least ours.
    fn select_sync_peer(&mut self) {
        if self.sync_peer.is_some() {
            return;
        }

        let best_height = self.chain.best_snapshot().height;
        let chosen = self
            .peers
            .iter()
            .find(|(_, ctx)| {
                ctx.state.sync_candidate
                    && !ctx.handle.is_disconnect_pending()
                    && ctx.handle.height() >= best_height
            })
            .map(|(id, _)| *id);

        let Some(id) = chosen else {
            if self.phase != SyncPhase::Discovering {
                debug!("no sync peer available");
                self.phase = SyncPhase::Discovering;
            }
            return;
        };

        self.sync_peer = Some(id);
        let height = self.peers[&id].handle.height();
        info!(peer = id, height, local = best_height, "selected sync peer");

        if self.header_chain.is_empty() {
            self.phase = SyncPhase::SyncingHeaders;
            self.request_headers(id);
        } else {
            // A previous sync peer left a validated header chain behind;
            // resume body downloads from the next expected header.
            self.phase = SyncPhase::SyncingBlocks;
            self.fill_block_window();
        }
    }

    /// Send a locator-based getheaders to the sync peer and arm its stall
    /// deadline.
    fn request_headers(&mut self, id: i32) {
        let locator = match self.header_chain.tip() {
            Some(tip) => BlockLocator::new(vec![tip.hash]),
            None => self.chain.block_locator(),
        };
        let Some(ctx) = self.peers.get_mut(&id) else {
            return;
        };
        debug!(peer = id, locator_len = locator.len(), "requesting headers");
        ctx.handle.queue_message(Message::GetHeaders {
            locator,
            stop_hash: Hash::ZERO,
        });
        ctx.state.stall_deadline = Some(Instant::now() + self.tuning.stall_timeout);
    }

    // ------------------------------------------------------------------
    // Headers-first pipeline
    // ------------------------------------------------------------------

    fn handle_headers(&mut self, headers: Vec<BlockHeader>, peer: PeerId) {
        if headers.len() > MAX_HEADERS_PER_MSG {
            self.punish(peer, MisbehaviorReason::OversizedMessage);
            return;
        }
        if self.sync_peer != Some(peer.0) {
            debug!(peer = %peer, count = headers.len(), "ignoring headers from non-sync peer");
            return;
        }
        if !self.peers.contains_key(&peer.0) {
            return;
        }

        if headers.is_empty() {
            // The peer has nothing beyond our locator.
            if let Some(ctx) = self.peers.get_mut(&peer.0) {
                ctx.state.stall_deadline = None;
            }
            self.enter_block_phase();
            return;
        }

        let (parent_hash, parent_height) = match self.header_chain.tip() {
            Some(tip) => (tip.hash, tip.height),
            None => {
                let snapshot = self.chain.best_snapshot();
                (snapshot.hash, snapshot.height)
            }
        };

        let nodes =
            match HeaderChain::validate_batch(&headers, parent_hash, parent_height, &self.pow_limit)
            {
                Ok(nodes) => nodes,
                Err(err) => {
                    warn!(peer = %peer, %err, "rejecting header batch");
                    self.punish(peer, MisbehaviorReason::InvalidHeader);
                    return;
                }
            };

        if !self.disable_checkpoints {
            for node in &nodes {
                if let Some(checkpoint) = self.checkpoint_at(node.height) {
                    if checkpoint.hash != node.hash {
                        warn!(
                            peer = %peer,
                            height = node.height,
                            got = %node.hash,
                            want = %checkpoint.hash,
                            "header contradicts checkpoint"
                        );
                        self.punish(peer, MisbehaviorReason::CheckpointMismatch);
                        return;
                    }
                }
            }
        }

        let count = nodes.len();
        let tip_hash = nodes[count - 1].hash;
        let tip_height = nodes[count - 1].height;
        self.header_chain.extend(nodes);

        let full_batch = count == MAX_HEADERS_PER_MSG;
        if let Some(ctx) = self.peers.get_mut(&peer.0) {
            if ctx.handle.height() < tip_height {
                ctx.handle.set_height(tip_height);
            }
            ctx.state.stall_deadline = Some(Instant::now() + self.tuning.stall_timeout);
            debug!(
                peer = %peer,
                count,
                tip_height,
                pending = self.header_chain.len(),
                "header chain advanced"
            );

            if full_batch {
                // More to come: continue from the new tip.
                ctx.handle.queue_message(Message::GetHeaders {
                    locator: BlockLocator::new(vec![tip_hash]),
                    stop_hash: Hash::ZERO,
                });
                self.phase = SyncPhase::SyncingHeaders;
                return;
            }
        }

        self.enter_block_phase();
    }

    /// Header download finished (partial or empty batch): move to parallel
    /// block download, or straight to current when nothing is owed.
    fn enter_block_phase(&mut self) {
        if self.header_chain.is_empty() {
            self.update_phase();
            return;
        }
        if self.phase != SyncPhase::SyncingBlocks {
            info!(
                headers = self.header_chain.len(),
                window = self.tuning.block_download_window,
                "switching to block download"
            );
            self.phase = SyncPhase::SyncingBlocks;
        }
        self.fill_block_window();
    }

    /// Keep up to the configured window of block requests outstanding to the
    /// sync peer, drawing hashes in header-chain order.
    fn fill_block_window(&mut self) {
        let Some(id) = self.sync_peer else {
            return;
        };

        let in_flight = match self.peers.get(&id) {
            Some(ctx) => ctx.state.requested_blocks.len(),
            None => return,
        };
        let window = self.tuning.block_download_window;
        if in_flight >= window {
            return;
        }

        let pending_blocks = &self.pending_blocks;
        let hashes = self
            .header_chain
            .next_to_schedule(window - in_flight, |hash| pending_blocks.contains_key(hash));

        if hashes.is_empty() {
            if in_flight == 0 {
                self.update_phase();
            }
            return;
        }

        let Some(ctx) = self.peers.get_mut(&id) else {
            return;
        };
        let mut getdata = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let inv = InvVect::block(hash);
            if self.requested.try_claim(inv, PeerId(id)) {
                ctx.state.requested_blocks.insert(hash);
                getdata.push(inv);
            }
        }
        if getdata.is_empty() {
            return;
        }

        trace!(peer = id, count = getdata.len(), "requesting block bodies");
        ctx.state.stall_deadline = Some(Instant::now() + self.tuning.stall_timeout);
        ctx.handle.queue_message(Message::GetData(getdata));
    }

    fn handle_block(&mut self, block: Block, peer: PeerId) {
        let hash = block.block_hash();

        let requested = match self.peers.get_mut(&peer.0) {
            Some(ctx) => {
                ctx.handle.add_known_inventory(InvVect::block(hash));
                let requested = ctx.state.requested_blocks.remove(&hash);
                if requested {
                    if self.requested.claimed_by(&InvVect::block(hash)) == Some(peer) {
                        self.requested.release(&InvVect::block(hash));
                    }
                    ctx.state.stall_deadline = if ctx.state.has_outstanding_requests() {
                        Some(Instant::now() + self.tuning.stall_timeout)
                    } else {
                        None
                    };
                }
                requested
            }
            None => return,
        };

        if !requested {
            debug!(peer = %peer, block = %hash, "unrequested block");
            self.punish(peer, MisbehaviorReason::UnrequestedData);
            return;
        }

        if self.header_chain.contains(&hash) {
            // Catch-up path: buffer and submit strictly in header order.
            self.pending_blocks.insert(hash, block);
            self.submit_ready_blocks();
            self.fill_block_window();
        } else {
            // Current path: submit in arrival order.
            self.submit_block(block, Some(peer), BehaviorFlags::NONE);
            self.update_phase();
        }
    }

    /// Hand buffered blocks to the validator while the oldest pending header
    /// has its body. The validator therefore always sees a block after its
    /// parent.
    fn submit_ready_blocks(&mut self) {
        while let Some(front) = self.header_chain.front() {
            let hash = front.hash;
            let height = front.height;
            let Some(block) = self.pending_blocks.remove(&hash) else {
                break;
            };
            self.header_chain.pop_front();

            let flags = self.behavior_flags_for(height);
            match self.chain.process_block(&block, flags) {
                Ok(false) => {
                    trace!(height, block = %hash, fast_add = flags.fast_add, "block connected");
                    self.on_block_accepted(&block, self.sync_peer.map(PeerId));
                }
                Ok(true) => {
                    // Cannot happen for an in-order submission; treat as a
                    // validator fault rather than trusting the pipeline.
                    error!(block = %hash, "validator orphaned an in-order block");
                    break;
                }
                Err(ChainError::Duplicate(_)) => {
                    debug!(block = %hash, "duplicate block in pipeline");
                }
                Err(ChainError::Rule { reason, .. }) => {
                    warn!(block = %hash, reason, "sync peer served an invalid block");
                    if let Some(id) = self.sync_peer {
                        self.punish(PeerId(id), MisbehaviorReason::InvalidBlock);
                    }
                    return;
                }
                Err(ChainError::Internal(fault)) => {
                    error!(%fault, "validator internal fault; halting pipeline");
                    return;
                }
            }
        }
        self.update_phase();
    }

    /// Submit a single block outside the header pipeline.
    fn submit_block(
        &mut self,
        block: Block,
        source: Option<PeerId>,
        flags: BehaviorFlags,
    ) -> SyncResult<bool> {
        let hash = block.block_hash();
        match self.chain.process_block(&block, flags) {
            Ok(false) => {
                self.on_block_accepted(&block, source);
                Ok(false)
            }
            Ok(true) => {
                debug!(block = %hash, "validator held block as orphan");
                if let Some(peer) = source {
                    // Ask the announcer for the missing ancestry.
                    let locator = self.chain.block_locator();
                    if let Some(ctx) = self.peers.get(&peer.0) {
                        ctx.handle.queue_message(Message::GetBlocks {
                            locator,
                            stop_hash: Hash::ZERO,
                        });
                    }
                }
                Ok(true)
            }
            Err(ChainError::Duplicate(_)) => {
                debug!(block = %hash, "duplicate block");
                Err(SyncError::DuplicateWork)
            }
            Err(ChainError::Rule { reason, .. }) => {
                warn!(block = %hash, reason, "block rejected by validator");
                if let Some(peer) = source {
                    self.punish(peer, MisbehaviorReason::InvalidBlock);
                }
                Err(SyncError::Validation(reason))
            }
            Err(ChainError::Internal(fault)) => {
                error!(%fault, "validator internal fault");
                Err(SyncError::InternalFault(fault))
            }
        }
    }

    /// Post-acceptance bookkeeping: mempool cleanup, fee estimation, relay,
    /// and peer-height propagation.
    fn on_block_accepted(&mut self, block: &Block, source: Option<PeerId>) {
        let hash = block.block_hash();
        let snapshot = self.chain.best_snapshot();
        let height = self.chain.block_height(&hash).unwrap_or(snapshot.height);

        let confirmed = self.mempool.confirmed_block(block);
        if !confirmed.is_empty() {
            let confirmed_set: HashSet<Hash> = confirmed.iter().copied().collect();
            for tx in &block.transactions {
                if confirmed_set.contains(&tx.txid()) {
                    self.notifier.transaction_confirmed(tx);
                }
            }
        }
        if let Some(sink) = &self.fee_estimator {
            sink.register_block(height, &confirmed);
        }

        // Relay only once caught up; during initial sync every block would
        // be stale news to the network.
        if self.current_state() {
            self.notifier
                .relay_inventory(InvVect::block(hash), &RelayPayload::Block(block.header));
        }

        self.notifier.update_peer_heights(&hash, height, source);

        // A peer whose announced tip just connected has resolved its height.
        for ctx in self.peers.values_mut() {
            if ctx.state.last_announced_block == Some(hash) {
                ctx.handle.set_height(height);
                ctx.state.last_announced_block = None;
            }
        }
    }

    /// Fast-add below the next unpassed checkpoint; full validation beyond.
    fn behavior_flags_for(&self, height: u32) -> BehaviorFlags {
        if self.disable_checkpoints {
            return BehaviorFlags::NONE;
        }
        let best = self.chain.best_snapshot().height;
        match self.params.next_checkpoint(best) {
            Some(checkpoint) if height <= checkpoint.height => BehaviorFlags::FAST_ADD,
            _ => BehaviorFlags::NONE,
        }
    }

    fn checkpoint_at(&self, height: u32) -> Option<&Checkpoint> {
        self.params
            .checkpoints
            .iter()
            .find(|cp| cp.height == height)
    }

    // ------------------------------------------------------------------
    // Inventory and relay
    // ------------------------------------------------------------------

    fn handle_inv(&mut self, inv: Vec<InvVect>, peer: PeerId) {
        if inv.len() > MAX_INV_PER_MSG {
            self.punish(peer, MisbehaviorReason::OversizedMessage);
            return;
        }

        let catch_up = !self.current_state();
        let from_sync_peer = self.sync_peer == Some(peer.0);

        let Some(ctx) = self.peers.get_mut(&peer.0) else {
            return;
        };

        // Remember the newest block the peer claims to have; its height
        // resolves lazily once the block connects.
        if let Some(last_block) = inv.iter().rev().find(|iv| iv.inv_type.is_block()) {
            ctx.state.last_announced_block = Some(last_block.hash);
            if let Some(height) = self.chain.block_height(&last_block.hash) {
                ctx.handle.set_height(height);
            }
        }

        let mut getdata = Vec::new();
        for iv in inv {
            ctx.handle.add_known_inventory(iv);

            if iv.inv_type.is_block() {
                if self.chain.have_block(&iv.hash)
                    || self.header_chain.contains(&iv.hash)
                    || self.pending_blocks.contains_key(&iv.hash)
                    || self.requested.contains(&iv)
                {
                    continue;
                }
                // During catch-up, block announcements never open a second
                // download source; the header pipeline owns block fetching.
                if catch_up {
                    continue;
                }
                if self.requested.try_claim(iv, peer) {
                    ctx.state.requested_blocks.insert(iv.hash);
                    getdata.push(iv);
                }
            } else {
                if self.mempool.contains(&iv.hash)
                    || self.orphans.contains(&iv.hash)
                    || self.rejected.contains(&iv.hash)
                    || self.chain.transaction_in_chain(&iv.hash)
                    || self.requested.contains(&iv)
                {
                    continue;
                }
                if self.requested.try_claim(iv, peer) {
                    ctx.state.requested_txns.insert(iv.hash);
                    getdata.push(iv);
                }
            }
        }

        if !getdata.is_empty() {
            trace!(peer = %peer, count = getdata.len(), from_sync_peer, "requesting announced items");
            ctx.state.stall_deadline = Some(Instant::now() + self.tuning.stall_timeout);
            ctx.handle.queue_message(Message::GetData(getdata));
        }
    }

    fn handle_not_found(&mut self, inv: Vec<InvVect>, peer: PeerId) {
        let mut released_blocks = HashSet::new();
        {
            let Some(ctx) = self.peers.get_mut(&peer.0) else {
                return;
            };
            for iv in &inv {
                if self.requested.claimed_by(iv) != Some(peer) {
                    continue;
                }
                self.requested.release(iv);
                if iv.inv_type.is_block() {
                    ctx.state.requested_blocks.remove(&iv.hash);
                    released_blocks.insert(iv.hash);
                } else {
                    ctx.state.requested_txns.remove(&iv.hash);
                }
            }
            if !ctx.state.has_outstanding_requests() {
                ctx.state.stall_deadline = None;
            }
            debug!(peer = %peer, count = inv.len(), "peer reported notfound");
        }

        if !released_blocks.is_empty() {
            // Let another scheduling round re-request the bodies.
            self.header_chain.unschedule(&released_blocks);
            self.fill_block_window();
        }
    }

    // ------------------------------------------------------------------
    // Mempool gateway
    // ------------------------------------------------------------------

    fn handle_tx(&mut self, tx: Transaction, peer: PeerId) {
        let txid = tx.txid();
        let fingerprint = InvVect::tx(txid);

        {
            let Some(ctx) = self.peers.get_mut(&peer.0) else {
                return;
            };
            // Whoever sent the transaction knows it; never announce it back.
            ctx.handle.add_known_inventory(fingerprint);
            ctx.state.requested_txns.remove(&txid);
            if self.requested.claimed_by(&fingerprint) == Some(peer) {
                self.requested.release(&fingerprint);
            }
            if !ctx.state.has_outstanding_requests() {
                ctx.state.stall_deadline = None;
            } else {
                ctx.state.stall_deadline = Some(Instant::now() + self.tuning.stall_timeout);
            }
        }

        // Anything already known is silently dropped: duplicate work.
        if self.mempool.contains(&txid)
            || self.orphans.contains(&txid)
            || self.rejected.contains(&txid)
            || self.chain.transaction_in_chain(&txid)
        {
            trace!(tx = %txid, peer = %peer, "duplicate transaction dropped");
            return;
        }

        match self.mempool.accept_transaction(&tx) {
            Ok(acceptance) => {
                debug!(tx = %txid, peer = %peer, fee_per_kb = acceptance.fee_per_kb, "transaction accepted");
                self.announce_transaction(&acceptance);
                self.process_orphan_cascade(txid);
            }
            Err(TxRejection::MissingInputs(missing)) => {
                debug!(
                    tx = %txid,
                    peer = %peer,
                    missing = missing.len(),
                    "transaction orphaned"
                );
                self.orphans
                    .insert(tx, peer, std::time::Instant::now());
            }
            Err(TxRejection::Duplicate) => {
                trace!(tx = %txid, "duplicate transaction");
            }
            Err(TxRejection::Policy(reason)) => {
                debug!(tx = %txid, reason, "transaction rejected by policy");
                self.rejected.insert(txid);
            }
            Err(TxRejection::Malicious(reason)) => {
                warn!(tx = %txid, peer = %peer, reason, "malicious transaction");
                self.rejected.insert(txid);
                self.punish(peer, MisbehaviorReason::MaliciousTransaction);
            }
        }
    }

    fn announce_transaction(&mut self, acceptance: &crate::interface::TxAcceptance) {
        self.notifier
            .announce_new_transactions(std::slice::from_ref(acceptance));
        if let Some(sink) = &self.fee_estimator {
            sink.observe_transaction(acceptance.txid, acceptance.fee_per_kb);
        }
    }

    /// A parent was accepted: retry its orphaned dependents, cascading
    /// through newly admitted transactions. Each orphan is tried at most
    /// once per arrival.
    fn process_orphan_cascade(&mut self, root: Hash) {
        let mut worklist = vec![root];
        let mut attempted: HashSet<Hash> = HashSet::new();

        while let Some(parent) = worklist.pop() {
            for orphan_id in self.orphans.dependents_of(&parent) {
                if !attempted.insert(orphan_id) {
                    continue;
                }
                let Some(orphan) = self.orphans.get(&orphan_id) else {
                    continue;
                };
                let orphan_tx = orphan.tx.clone();

                match self.mempool.accept_transaction(&orphan_tx) {
                    Ok(acceptance) => {
                        self.orphans.remove(&orphan_id);
                        debug!(tx = %orphan_id, parent = %parent, "orphan resolved");
                        self.announce_transaction(&acceptance);
                        worklist.push(orphan_id);
                    }
                    Err(TxRejection::MissingInputs(_)) => {
                        // Other parents still missing; stays in the pool.
                    }
                    Err(TxRejection::Duplicate) => {
                        self.orphans.remove(&orphan_id);
                    }
                    Err(TxRejection::Policy(reason)) | Err(TxRejection::Malicious(reason)) => {
                        debug!(tx = %orphan_id, reason, "orphan rejected on reconsideration");
                        self.orphans.remove(&orphan_id);
                        self.rejected.insert(orphan_id);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Serving side
    // ------------------------------------------------------------------

    fn handle_get_data(&mut self, inv: Vec<InvVect>, peer: PeerId) {
        if inv.len() > MAX_INV_PER_MSG {
            self.punish(peer, MisbehaviorReason::OversizedMessage);
            return;
        }
        let Some(ctx) = self.peers.get(&peer.0) else {
            return;
        };
        let handle = ctx.handle.clone();

        let mut notfound = Vec::new();
        for iv in inv {
            match iv.inv_type {
                t if t.is_tx() => match self.mempool.fetch_transaction(&iv.hash) {
                    Some(tx) => handle.queue_message(Message::Tx(tx)),
                    None => notfound.push(iv),
                },
                tern_wire::InvType::FilteredBlock => {
                    if !handle.has_filter() {
                        continue;
                    }
                    match self.chain.block_by_hash(&iv.hash) {
                        Some(block) => serve_filtered_block(&handle, &block),
                        None => notfound.push(iv),
                    }
                }
                _ => match self.chain.block_by_hash(&iv.hash) {
                    Some(block) => handle.queue_message(Message::Block(block)),
                    None => notfound.push(iv),
                },
            }
        }

        if !notfound.is_empty() {
            handle.queue_message(Message::NotFound(notfound));
        }
    }

    fn handle_get_headers(&mut self, locator: BlockLocator, stop_hash: Hash, peer: PeerId) {
        let mut headers = self.chain.headers_after(&locator, &stop_hash);
        headers.truncate(MAX_HEADERS_PER_MSG);
        let Some(ctx) = self.peers.get(&peer.0) else {
            return;
        };
        trace!(peer = %peer, count = headers.len(), "serving headers");
        ctx.handle.queue_message(Message::Headers(headers));
    }

    fn handle_get_blocks(&mut self, locator: BlockLocator, stop_hash: Hash, peer: PeerId) {
        let hashes = self
            .chain
            .block_hashes_after(&locator, &stop_hash, MAX_BLOCKS_PER_GETBLOCKS);
        let Some(ctx) = self.peers.get(&peer.0) else {
            return;
        };

        let mut invs = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let iv = InvVect::block(hash);
            if ctx.handle.add_known_inventory(iv) {
                invs.push(iv);
            }
        }
        if !invs.is_empty() {
            trace!(peer = %peer, count = invs.len(), "serving block inventory");
            ctx.handle.queue_message(Message::Inv(invs));
        }
    }

    fn handle_mempool_request(&mut self, peer: PeerId) {
        let Some(ctx) = self.peers.get(&peer.0) else {
            return;
        };
        let handle = ctx.handle.clone();

        let mut invs = Vec::new();
        for txid in self.mempool.inventory_above(handle.fee_filter()) {
            if invs.len() >= MAX_INV_PER_MSG {
                break;
            }
            if handle.has_filter() {
                let Some(tx) = self.mempool.fetch_transaction(&txid) else {
                    continue;
                };
                if !handle.filter_matches(&tx) {
                    continue;
                }
            }
            let iv = InvVect::tx(txid);
            if handle.add_known_inventory(iv) {
                invs.push(iv);
            }
        }

        debug!(peer = %peer, count = invs.len(), "serving mempool inventory");
        if !invs.is_empty() {
            handle.queue_message(Message::Inv(invs));
        }
    }

    // ------------------------------------------------------------------
    // Per-peer relay policy
    // ------------------------------------------------------------------

    fn handle_filter_load(&mut self, load: FilterLoad, peer: PeerId) {
        if !self.peer_supports_bloom(peer) {
            self.punish(peer, MisbehaviorReason::FilterWithoutService);
            return;
        }
        match BloomFilter::from_load(load) {
            Ok(filter) => {
                if let Some(ctx) = self.peers.get(&peer.0) {
                    debug!(peer = %peer, "bloom filter loaded");
                    ctx.handle.set_filter(filter);
                }
            }
            Err(err) => {
                warn!(peer = %peer, %err, "rejecting bloom filter");
                self.punish(peer, MisbehaviorReason::InvalidFilter);
            }
        }
    }

    fn handle_filter_add(&mut self, data: Vec<u8>, peer: PeerId) {
        if !self.peer_supports_bloom(peer) {
            self.punish(peer, MisbehaviorReason::FilterWithoutService);
            return;
        }
        if data.is_empty() || data.len() > MAX_FILTER_ADD_SIZE {
            self.punish(peer, MisbehaviorReason::InvalidFilter);
            return;
        }
        let inserted = match self.peers.get(&peer.0) {
            Some(ctx) => ctx.handle.filter_insert(&data),
            None => return,
        };
        if !inserted {
            // filteradd with no filter loaded is a protocol violation.
            self.punish(peer, MisbehaviorReason::InvalidFilter);
        }
    }

    fn handle_filter_clear(&mut self, peer: PeerId) {
        if !self.peer_supports_bloom(peer) {
            self.punish(peer, MisbehaviorReason::FilterWithoutService);
            return;
        }
        if let Some(ctx) = self.peers.get(&peer.0) {
            ctx.handle.clear_filter();
        }
    }

    fn handle_fee_filter(&mut self, min_fee_per_kb: i64, peer: PeerId) {
        if min_fee_per_kb < 0 {
            self.punish(peer, MisbehaviorReason::InvalidFeeFilter);
            return;
        }
        if let Some(ctx) = self.peers.get(&peer.0) {
            debug!(peer = %peer, min_fee_per_kb, "fee filter updated");
            ctx.handle.set_fee_filter(min_fee_per_kb);
        }
    }

    fn peer_supports_bloom(&self, peer: PeerId) -> bool {
        self.peers
            .get(&peer.0)
            .map(|ctx| ctx.handle.services().has(tern_wire::ServiceFlags::BLOOM))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Caller-driven paths and queries
    // ------------------------------------------------------------------

    fn handle_process_block(&mut self, block: Block, flags: BehaviorFlags) -> SyncResult<bool> {
        self.submit_block(block, None, flags)
    }

    /// Caught up: the validator considers its tip recent, and the sync peer
    /// (if any) claims nothing beyond our best height.
    fn current_state(&self) -> bool {
        if !self.chain.is_current() {
            return false;
        }
        match self.sync_peer {
            None => true,
            Some(id) => match self.peers.get(&id) {
                Some(ctx) => ctx.handle.height() <= self.chain.best_snapshot().height,
                None => true,
            },
        }
    }

    fn update_phase(&mut self) {
        if self.phase == SyncPhase::Current {
            return;
        }
        if self.header_chain.is_empty() && self.pending_blocks.is_empty() && self.current_state() {
            info!(
                height = self.chain.best_snapshot().height,
                "chain is current"
            );
            self.phase = SyncPhase::Current;
        }
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    /// Raise a peer's misbehavior score, banning when the reason is critical
    /// or the accumulated score crosses the threshold.
    fn punish(&mut self, peer: PeerId, reason: MisbehaviorReason) {
        let Some(ctx) = self.peers.get_mut(&peer.0) else {
            return;
        };
        if ctx.state.banned {
            return;
        }
        ctx.state.misbehavior = ctx.state.misbehavior.saturating_add(reason.score());
        let score = ctx.state.misbehavior;

        if reason.is_critical() || score >= BAN_THRESHOLD {
            self.ban_peer(peer, reason);
        } else {
            debug!(peer = %peer, %reason, score, "peer misbehavior noted");
        }
    }

    fn ban_peer(&mut self, peer: PeerId, reason: MisbehaviorReason) {
        {
            let Some(ctx) = self.peers.get_mut(&peer.0) else {
                return;
            };
            warn!(peer = %peer, %reason, score = ctx.state.misbehavior, "banning peer");
            ctx.state.banned = true;
            ctx.state.sync_candidate = false;
            ctx.handle.disconnect();
        }
        self.release_peer_requests(peer);

        if self.sync_peer == Some(peer.0) {
            // The authoritative source lied; restart the pipeline cleanly
            // from validated chain state.
            self.sync_peer = None;
            self.header_chain.clear();
            self.pending_blocks.clear();
            self.phase = SyncPhase::Discovering;
            self.select_sync_peer();
        }
    }

    /// Liveness, not misbehavior: drop the connection and let re-selection
    /// find another source. The peer is not banned.
    fn disconnect_stalled(&mut self, peer: PeerId) {
        {
            let Some(ctx) = self.peers.get_mut(&peer.0) else {
                return;
            };
            warn!(
                peer = %peer,
                outstanding_blocks = ctx.state.requested_blocks.len(),
                outstanding_txns = ctx.state.requested_txns.len(),
                "peer stalled past deadline, disconnecting"
            );
            ctx.state.sync_candidate = false;
            ctx.handle.disconnect();
        }
        self.release_peer_requests(peer);

        if self.sync_peer == Some(peer.0) {
            self.sync_peer = None;
            // Keep the validated header chain: the next sync peer resumes
            // from the next expected header.
            self.select_sync_peer();
        }
    }

    /// Free every request owed by a peer so the items can be fetched from
    /// someone else. Leaves no dangling fingerprint behind.
    fn release_peer_requests(&mut self, peer: PeerId) {
        let Some(ctx) = self.peers.get_mut(&peer.0) else {
            return;
        };

        let blocks: HashSet<Hash> = ctx.state.requested_blocks.drain().collect();
        ctx.state.requested_txns.clear();
        ctx.state.stall_deadline = None;

        let released = self.requested.release_peer(peer);
        if !released.is_empty() || !blocks.is_empty() {
            debug!(
                peer = %peer,
                released = released.len(),
                "released in-flight requests"
            );
        }
        self.header_chain.unschedule(&blocks);
    }

    fn check_stalls(&mut self) {
        let now = Instant::now();
        let stalled: Vec<i32> = self
            .peers
            .iter()
            .filter(|(_, ctx)| {
                !ctx.state.banned
                    && !ctx.handle.is_disconnect_pending()
                    && ctx.state.stall_deadline.map_or(false, |d| d <= now)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stalled {
            self.disconnect_stalled(PeerId(id));
        }
    }

    fn expire_orphans(&mut self) {
        self.orphans.expire(std::time::Instant::now());
    }
}

/// Answer a filtered-block request: the merkle summary first, then every
/// matched transaction.
fn serve_filtered_block(handle: &Arc<PeerHandle>, block: &Block) {
    let mut matched_hashes = Vec::new();
    let mut matched_txs = Vec::new();
    for tx in &block.transactions {
        if handle.filter_matches(tx) {
            matched_hashes.push(tx.txid());
            matched_txs.push(tx.clone());
        }
    }
    handle.queue_message(Message::MerkleBlock(MerkleBlock {
        header: block.header,
        total_transactions: block.transactions.len() as u32,
        matched_hashes,
    }));
    for tx in matched_txs {
        handle.queue_message(Message::Tx(tx));
    }
}

fn ack(done: Option<oneshot::Sender<()>>) {
    if let Some(done) = done {
        let _ = done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{ChainSnapshot, TxAcceptance};

    struct NullNotifier;

    impl PeerNotifier for NullNotifier {
        fn announce_new_transactions(&self, _txs: &[TxAcceptance]) {}
        fn update_peer_heights(&self, _hash: &Hash, _height: u32, _source: Option<PeerId>) {}
        fn relay_inventory(&self, _inv: InvVect, _payload: &RelayPayload) {}
        fn transaction_confirmed(&self, _tx: &Transaction) {}
    }

    struct NullChain;

    impl Chain for NullChain {
        fn best_snapshot(&self) -> ChainSnapshot {
            ChainSnapshot {
                hash: Hash::ZERO,
                height: 0,
                timestamp: 0,
            }
        }
        fn have_block(&self, _hash: &Hash) -> bool {
            false
        }
        fn block_height(&self, _hash: &Hash) -> Option<u32> {
            None
        }
        fn block_locator(&self) -> BlockLocator {
            BlockLocator::new(vec![Hash::ZERO])
        }
        fn process_block(&self, _block: &Block, _flags: BehaviorFlags) -> Result<bool, ChainError> {
            Err(ChainError::Duplicate(Hash::ZERO))
        }
        fn block_by_hash(&self, _hash: &Hash) -> Option<Block> {
            None
        }
        fn headers_after(&self, _locator: &BlockLocator, _stop_hash: &Hash) -> Vec<BlockHeader> {
            Vec::new()
        }
        fn block_hashes_after(
            &self,
            _locator: &BlockLocator,
            _stop_hash: &Hash,
            _max: usize,
        ) -> Vec<Hash> {
            Vec::new()
        }
        fn transaction_in_chain(&self, _txid: &Hash) -> bool {
            false
        }
        fn is_current(&self) -> bool {
            true
        }
    }

    struct NullPool;

    impl TxMemPool for NullPool {
        fn contains(&self, _txid: &Hash) -> bool {
            false
        }
        fn accept_transaction(&self, _tx: &Transaction) -> Result<TxAcceptance, TxRejection> {
            Err(TxRejection::Duplicate)
        }
        fn fetch_transaction(&self, _txid: &Hash) -> Option<Transaction> {
            None
        }
        fn confirmed_block(&self, _block: &Block) -> Vec<Hash> {
            Vec::new()
        }
        fn inventory_above(&self, _min_fee_per_kb: i64) -> Vec<Hash> {
            Vec::new()
        }
        fn count(&self) -> usize {
            0
        }
    }

    fn null_config() -> Config {
        Config::new(
            Arc::new(NullNotifier),
            Arc::new(NullChain),
            Arc::new(NullPool),
            Arc::new(ChainParams {
                name: "nulltest",
                genesis_hash: Hash::ZERO,
                pow_limit_bits: 0x2200ffff,
                checkpoints: Vec::new(),
            }),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = SyncManager::new(null_config()).start();

        assert_eq!(handle.sync_peer_id().await.unwrap(), 0);
        assert!(handle.is_current().await.unwrap());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_submissions_fail_after_stop() {
        let handle = SyncManager::new(null_config()).start();
        handle.stop().await;

        let err = handle.queue_inv(Vec::new(), PeerId(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Shutdown));

        let err = handle.sync_peer_id().await.unwrap_err();
        assert!(matches!(err, SyncError::Shutdown));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let handle = SyncManager::new(null_config()).start();
        handle.stop().await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_pause_resumes_on_drop() {
        let handle = SyncManager::new(null_config()).start();

        let resume = handle.pause().await.unwrap();
        drop(resume);

        // The loop must be alive again to answer this.
        assert_eq!(handle.sync_peer_id().await.unwrap(), 0);
        handle.stop().await;
    }
}
