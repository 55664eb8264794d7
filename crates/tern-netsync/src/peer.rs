//! The thin peer adapter.
//!
//! Wire framing, the handshake, and ping/pong live in the connection layer;
//! the sync engine sees a peer only through [`PeerHandle`]: identity, sync
//! capabilities, an outbound message queue, and the relay-suppression state
//! (known inventory, bloom filter, fee filter).

use crate::lru::LruSet;
use crate::{DEFAULT_MAX_KNOWN_INVENTORY, MIN_SYNC_PEER_VERSION};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};
use tern_wire::{BloomFilter, InvVect, Message, ServiceFlags, Transaction};

/// Outbound queue capacity per peer.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Unique identifier of a connected peer, assigned by the surrounding node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub i32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether dropping this message under queue pressure is acceptable.
///
/// Replies to explicit requests and our own requests must survive; pure
/// announcements may be shed.
fn is_critical(message: &Message) -> bool {
    !matches!(message, Message::Inv(_) | Message::FeeFilter { .. })
}

/// Bounded outbound message queue.
///
/// When full, the oldest non-critical message is shed to make room; critical
/// messages are never dropped.
struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message. Returns false when the message itself was shed.
    fn push(&self, message: Message) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            if let Some(victim) = queue.iter().position(|m| !is_critical(m)) {
                let dropped = queue.remove(victim);
                debug!(
                    command = dropped.map(|m| m.command()).unwrap_or(""),
                    "outbound queue full, shed oldest non-critical message"
                );
            } else if !is_critical(&message) {
                debug!(
                    command = message.command(),
                    "outbound queue full of critical messages, shedding new announcement"
                );
                return false;
            } else {
                // Critical backlog: allow temporary overflow rather than lose
                // a reply. Growth is bounded by the request window.
                warn!(len = queue.len(), "outbound queue over capacity");
            }
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        true
    }

    /// Dequeue the next message; None once closed and drained.
    async fn recv(&self) -> Option<Message> {
        loop {
            {
                let mut queue = self.inner.lock();
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn try_recv(&self) -> Option<Message> {
        self.inner.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Handle to one connected peer.
pub struct PeerHandle {
    /// Identity assigned by the node.
    id: PeerId,
    /// Services advertised in the handshake.
    services: ServiceFlags,
    /// Negotiated protocol version.
    protocol_version: u32,
    /// Height claimed in the handshake.
    starting_height: u32,
    /// Best height we currently believe the peer has.
    height: AtomicU32,
    /// True for connections we initiated.
    outbound: bool,
    /// Outbound message queue, drained by the connection task.
    queue: OutboundQueue,
    /// Inventory we believe the peer already knows.
    known_inventory: Mutex<LruSet<InvVect>>,
    /// Bloom filter loaded by the peer, if any.
    filter: Mutex<Option<BloomFilter>>,
    /// Minimum fee rate the peer wants announced (base units per kB).
    fee_filter: AtomicI64,
    /// Set once the sync engine decides the connection must go away.
    disconnect: AtomicBool,
}

impl PeerHandle {
    /// Create a handle for a freshly handshaken peer.
    pub fn new(
        id: PeerId,
        services: ServiceFlags,
        protocol_version: u32,
        starting_height: u32,
        outbound: bool,
    ) -> Self {
        Self {
            id,
            services,
            protocol_version,
            starting_height,
            height: AtomicU32::new(starting_height),
            outbound,
            queue: OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY),
            known_inventory: Mutex::new(LruSet::new(DEFAULT_MAX_KNOWN_INVENTORY)),
            filter: Mutex::new(None),
            fee_filter: AtomicI64::new(0),
            disconnect: AtomicBool::new(false),
        }
    }

    /// Peer identity.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Advertised services.
    pub fn services(&self) -> ServiceFlags {
        self.services
    }

    /// Negotiated protocol version.
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Height claimed at handshake time.
    pub fn starting_height(&self) -> u32 {
        self.starting_height
    }

    /// Best height currently attributed to the peer.
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Relaxed)
    }

    /// Update the peer's attributed height.
    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::Relaxed);
    }

    /// True for connections we initiated.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Eligible to serve as the authoritative chain source: a full node on
    /// an acceptable protocol version.
    pub fn is_sync_candidate(&self) -> bool {
        self.services.has(ServiceFlags::NETWORK)
            && self.protocol_version >= MIN_SYNC_PEER_VERSION
    }

    /// Enqueue an outbound message.
    pub fn queue_message(&self, message: Message) {
        self.queue.push(message);
    }

    /// Announce one inventory item, suppressing re-announcement.
    ///
    /// The item is recorded as known to the peer before the send is queued;
    /// if the peer already knew it, nothing is sent. Returns whether the
    /// announcement was queued.
    pub fn queue_inventory(&self, inv: InvVect) -> bool {
        if !self.add_known_inventory(inv) {
            return false;
        }
        self.queue.push(Message::Inv(vec![inv]))
    }

    /// Record an item as known to the peer. Returns false when it was
    /// already recorded.
    pub fn add_known_inventory(&self, inv: InvVect) -> bool {
        self.known_inventory.lock().insert(inv)
    }

    /// Whether the peer is believed to know an item.
    pub fn knows_inventory(&self, inv: &InvVect) -> bool {
        self.known_inventory.lock().contains(inv)
    }

    /// Next outbound message, for the connection task. None once the handle
    /// is disconnected and the queue drained.
    pub async fn next_message(&self) -> Option<Message> {
        self.queue.recv().await
    }

    /// Non-blocking dequeue.
    pub fn try_next_message(&self) -> Option<Message> {
        self.queue.try_recv()
    }

    /// Messages waiting to be sent.
    pub fn outbound_len(&self) -> usize {
        self.queue.len()
    }

    /// Load a bloom filter for this peer.
    pub fn set_filter(&self, filter: BloomFilter) {
        *self.filter.lock() = Some(filter);
    }

    /// Whether a bloom filter is loaded.
    pub fn has_filter(&self) -> bool {
        self.filter.lock().is_some()
    }

    /// Add an element to the loaded filter. Returns false when none loaded.
    pub fn filter_insert(&self, data: &[u8]) -> bool {
        match self.filter.lock().as_mut() {
            Some(filter) => {
                filter.insert(data);
                true
            }
            None => false,
        }
    }

    /// Drop the loaded filter.
    pub fn clear_filter(&self) {
        *self.filter.lock() = None;
    }

    /// Whether a transaction passes the peer's bloom filter. True when no
    /// filter is loaded.
    pub fn filter_matches(&self, tx: &Transaction) -> bool {
        match self.filter.lock().as_mut() {
            Some(filter) => filter.matches_transaction(tx),
            None => true,
        }
    }

    /// The peer's minimum announced fee rate.
    pub fn fee_filter(&self) -> i64 {
        self.fee_filter.load(Ordering::Relaxed)
    }

    /// Update the peer's fee filter.
    pub fn set_fee_filter(&self, min_fee_per_kb: i64) {
        self.fee_filter.store(min_fee_per_kb, Ordering::Relaxed);
    }

    /// Ask the connection layer to drop the peer. Closes the outbound queue.
    pub fn disconnect(&self) {
        if !self.disconnect.swap(true, Ordering::AcqRel) {
            debug!(peer = %self.id, "disconnect requested");
            self.queue.close();
        }
    }

    /// Whether disconnection has been requested.
    pub fn is_disconnect_pending(&self) -> bool {
        self.disconnect.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("services", &self.services)
            .field("version", &self.protocol_version)
            .field("height", &self.height())
            .field("outbound", &self.outbound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_wire::{Hash, PROTOCOL_VERSION};

    fn handle(id: i32) -> PeerHandle {
        PeerHandle::new(
            PeerId(id),
            ServiceFlags::NETWORK,
            PROTOCOL_VERSION,
            100,
            true,
        )
    }

    #[test]
    fn test_sync_candidate_requires_network_service() {
        assert!(handle(1).is_sync_candidate());

        let light = PeerHandle::new(PeerId(2), ServiceFlags::NONE, PROTOCOL_VERSION, 0, true);
        assert!(!light.is_sync_candidate());

        let stale = PeerHandle::new(
            PeerId(3),
            ServiceFlags::NETWORK,
            MIN_SYNC_PEER_VERSION - 1,
            0,
            true,
        );
        assert!(!stale.is_sync_candidate());
    }

    #[test]
    fn test_queue_inventory_suppresses_duplicates() {
        let peer = handle(1);
        let inv = InvVect::tx(Hash::digest(b"t"));

        assert!(peer.queue_inventory(inv));
        assert!(!peer.queue_inventory(inv));

        assert!(matches!(peer.try_next_message(), Some(Message::Inv(v)) if v == vec![inv]));
        assert!(peer.try_next_message().is_none());
    }

    #[test]
    fn test_known_inventory_recorded_before_send() {
        let peer = handle(1);
        let inv = InvVect::block(Hash::digest(b"b"));

        peer.queue_inventory(inv);
        // Already known even though the message has not been drained.
        assert!(peer.knows_inventory(&inv));
        assert_eq!(peer.outbound_len(), 1);
    }

    #[test]
    fn test_queue_sheds_oldest_announcement_when_full() {
        let peer = handle(1);

        let first = InvVect::tx(Hash::digest(b"first"));
        peer.queue_inventory(first);
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            peer.queue_message(Message::Headers(vec![])); // critical filler
        }

        // The queue was full; the oldest non-critical entry (the inv) went.
        let mut saw_inv = false;
        while let Some(message) = peer.try_next_message() {
            if matches!(message, Message::Inv(_)) {
                saw_inv = true;
            }
        }
        assert!(!saw_inv);
    }

    #[test]
    fn test_disconnect_closes_queue() {
        let peer = handle(1);
        peer.disconnect();
        assert!(peer.is_disconnect_pending());
        assert!(!peer.queue_inventory(InvVect::tx(Hash::digest(b"x"))));
    }

    #[test]
    fn test_fee_filter_roundtrip() {
        let peer = handle(1);
        assert_eq!(peer.fee_filter(), 0);
        peer.set_fee_filter(5_000);
        assert_eq!(peer.fee_filter(), 5_000);
    }

    #[tokio::test]
    async fn test_async_recv_sees_pushes() {
        let peer = std::sync::Arc::new(handle(1));
        let inv = InvVect::tx(Hash::digest(b"t"));

        let recv_peer = peer.clone();
        let task = tokio::spawn(async move { recv_peer.next_message().await });

        peer.queue_inventory(inv);
        let message = task.await.unwrap();
        assert!(matches!(message, Some(Message::Inv(_))));
    }
}
