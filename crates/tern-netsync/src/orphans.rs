//! The orphan transaction pool.
//!
//! Transactions whose inputs reference unknown parents wait here until the
//! parents arrive, then cascade back through mempool admission. The pool is
//! small and hostile-input-tolerant: bounded capacity with random-victim
//! eviction, a coarse expiry sweep, and weak peer references by ID only.

use crate::peer::PeerId;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tern_wire::{Hash, Transaction};
use tracing::debug;

/// An orphan awaiting its parents.
#[derive(Debug, Clone)]
pub struct OrphanTx {
    /// The transaction.
    pub tx: Transaction,
    /// Peer that delivered it. A weak reference: the peer may be long gone
    /// by the time the orphan resolves.
    pub peer: PeerId,
    /// When the coarse sweep may discard it.
    pub expiration: Instant,
}

/// Bounded pool of parentless transactions with a parent → dependents index.
#[derive(Debug)]
pub struct OrphanPool {
    capacity: usize,
    ttl: Duration,
    orphans: HashMap<Hash, OrphanTx>,
    /// Every input's parent txid → orphans depending on it.
    by_parent: HashMap<Hash, HashSet<Hash>>,
}

impl OrphanPool {
    /// Create a pool bounded to `capacity` orphans with the given lifetime.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            orphans: HashMap::new(),
            by_parent: HashMap::new(),
        }
    }

    /// Number of resident orphans.
    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    /// True when no orphans are held.
    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    /// Whether a transaction is held as an orphan.
    pub fn contains(&self, txid: &Hash) -> bool {
        self.orphans.contains_key(txid)
    }

    /// Fetch an orphan for serving or reprocessing.
    pub fn get(&self, txid: &Hash) -> Option<&OrphanTx> {
        self.orphans.get(txid)
    }

    /// Admit an orphan, evicting a random victim when at capacity.
    pub fn insert(&mut self, tx: Transaction, peer: PeerId, now: Instant) {
        let txid = tx.txid();
        if self.orphans.contains_key(&txid) {
            return;
        }

        while self.orphans.len() >= self.capacity {
            self.evict_random();
        }

        for input in &tx.inputs {
            self.by_parent
                .entry(input.previous_output.txid)
                .or_default()
                .insert(txid);
        }
        self.orphans.insert(
            txid,
            OrphanTx {
                tx,
                peer,
                expiration: now + self.ttl,
            },
        );
        debug!(tx = %txid, count = self.orphans.len(), "orphan transaction pooled");
    }

    /// Remove an orphan, cleaning its index entries.
    pub fn remove(&mut self, txid: &Hash) -> Option<OrphanTx> {
        let orphan = self.orphans.remove(txid)?;
        for input in &orphan.tx.inputs {
            let parent = input.previous_output.txid;
            if let Some(dependents) = self.by_parent.get_mut(&parent) {
                dependents.remove(txid);
                if dependents.is_empty() {
                    self.by_parent.remove(&parent);
                }
            }
        }
        Some(orphan)
    }

    /// IDs of orphans waiting on a given parent.
    pub fn dependents_of(&self, parent: &Hash) -> Vec<Hash> {
        self.by_parent
            .get(parent)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sweep orphans past their expiration. Returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.expiration <= now)
            .map(|(txid, _)| *txid)
            .collect();

        let count = expired.len();
        for txid in expired {
            self.remove(&txid);
        }
        if count > 0 {
            debug!(count, remaining = self.orphans.len(), "expired orphans evicted");
        }
        count
    }

    fn evict_random(&mut self) {
        let victim = self
            .orphans
            .keys()
            .copied()
            .choose(&mut rand::thread_rng());
        if let Some(txid) = victim {
            debug!(tx = %txid, "orphan pool full, evicting random victim");
            self.remove(&txid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_wire::{OutPoint, TxIn, TxOut};

    fn orphan_spending(parents: &[Hash], tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: parents
                .iter()
                .map(|parent| TxIn {
                    previous_output: OutPoint::new(*parent, 0),
                    signature_script: vec![tag],
                    sequence: u32::MAX,
                })
                .collect(),
            outputs: vec![TxOut {
                value: 1,
                pk_script: vec![tag],
            }],
            lock_time: 0,
        }
    }

    fn pool() -> OrphanPool {
        OrphanPool::new(100, Duration::from_secs(900))
    }

    #[test]
    fn test_insert_and_dependents() {
        let mut pool = pool();
        let parent = Hash::digest(b"parent");
        let tx = orphan_spending(&[parent], 1);
        let txid = tx.txid();

        pool.insert(tx, PeerId(7), Instant::now());

        assert!(pool.contains(&txid));
        assert_eq!(pool.dependents_of(&parent), vec![txid]);
        assert_eq!(pool.get(&txid).unwrap().peer, PeerId(7));
    }

    #[test]
    fn test_remove_cleans_reverse_index() {
        let mut pool = pool();
        let parent = Hash::digest(b"parent");
        let tx = orphan_spending(&[parent], 1);
        let txid = tx.txid();

        pool.insert(tx, PeerId(1), Instant::now());
        pool.remove(&txid);

        assert!(pool.dependents_of(&parent).is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_multi_parent_indexing() {
        let mut pool = pool();
        let p1 = Hash::digest(b"p1");
        let p2 = Hash::digest(b"p2");
        let tx = orphan_spending(&[p1, p2], 1);
        let txid = tx.txid();

        pool.insert(tx, PeerId(1), Instant::now());

        assert_eq!(pool.dependents_of(&p1), vec![txid]);
        assert_eq!(pool.dependents_of(&p2), vec![txid]);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let mut pool = OrphanPool::new(10, Duration::from_secs(900));
        let now = Instant::now();

        for i in 0..50u8 {
            let parent = Hash::digest(&[i]);
            pool.insert(orphan_spending(&[parent], i), PeerId(1), now);
            assert!(pool.len() <= 10);
        }
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn test_expiry_sweep() {
        let mut pool = OrphanPool::new(100, Duration::from_secs(900));
        let start = Instant::now();

        pool.insert(orphan_spending(&[Hash::digest(b"a")], 1), PeerId(1), start);
        pool.insert(orphan_spending(&[Hash::digest(b"b")], 2), PeerId(1), start);

        // Before the TTL nothing expires.
        assert_eq!(pool.expire(start + Duration::from_secs(899)), 0);
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.expire(start + Duration::from_secs(900)), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let mut pool = pool();
        let tx = orphan_spending(&[Hash::digest(b"p")], 1);

        pool.insert(tx.clone(), PeerId(1), Instant::now());
        pool.insert(tx, PeerId(2), Instant::now());

        assert_eq!(pool.len(), 1);
        // First delivery wins the attribution.
        assert_eq!(pool.get(&orphan_spending(&[Hash::digest(b"p")], 1).txid()).unwrap().peer, PeerId(1));
    }
}
