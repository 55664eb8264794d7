//! Transaction pool implementation.

use crate::{FeeOrdering, MempoolError, MempoolResult};
use crate::{DEFAULT_MAX_SIZE, DEFAULT_MAX_TXS, DEFAULT_TX_EXPIRY};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tern_wire::{Hash, OutPoint, Transaction};
use tracing::{debug, info, warn};

/// Mempool configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum total size in bytes.
    pub max_size: usize,
    /// Maximum number of transactions.
    pub max_transactions: usize,
    /// Transaction expiry time.
    pub tx_expiry: Duration,
    /// Minimum fee rate (base units per kilobyte) for admission.
    pub min_fee_per_kb: i64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_transactions: DEFAULT_MAX_TXS,
            tx_expiry: DEFAULT_TX_EXPIRY,
            min_fee_per_kb: 100,
        }
    }
}

/// A transaction resident in the pool.
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    /// The transaction itself.
    pub tx: Transaction,
    /// Cached identity hash.
    pub txid: Hash,
    /// Fee paid, in base units.
    pub fee: i64,
    /// Cached size in bytes.
    pub size: usize,
    /// Arrival instant (for expiry).
    pub arrival: Instant,
    /// Arrival sequence (for deterministic ordering).
    pub sequence: u64,
}

impl PooledTransaction {
    /// Wrap a transaction with its fee for pool admission.
    pub fn new(tx: Transaction, fee: i64) -> Self {
        let txid = tx.txid();
        let size = tx.size();
        Self {
            tx,
            txid,
            fee,
            size,
            arrival: Instant::now(),
            sequence: 0,
        }
    }

    /// Fee rate in base units per kilobyte.
    pub fn fee_per_kb(&self) -> i64 {
        if self.size == 0 {
            0
        } else {
            self.fee.saturating_mul(1000) / self.size as i64
        }
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, Default)]
pub struct MempoolStats {
    /// Number of transactions.
    pub tx_count: usize,
    /// Total size in bytes.
    pub total_size: usize,
}

/// Fee-ordered transaction pool with double-spend detection.
pub struct TxPool {
    /// Configuration.
    config: MempoolConfig,
    /// Transactions by ID.
    transactions: DashMap<Hash, PooledTransaction>,
    /// Outpoint to spending-transaction mapping.
    spent_outpoints: DashMap<OutPoint, Hash>,
    /// Fee-ordered transaction set.
    fee_order: RwLock<BTreeSet<FeeOrdering>>,
    /// Current total size.
    total_size: RwLock<usize>,
    /// Monotonic arrival counter.
    sequence: AtomicU64,
}

impl TxPool {
    /// Create a new pool with the given configuration.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: DashMap::new(),
            spent_outpoints: DashMap::new(),
            fee_order: RwLock::new(BTreeSet::new()),
            total_size: RwLock::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// Add a transaction to the pool after policy checks.
    pub fn add(&self, mut entry: PooledTransaction) -> MempoolResult<()> {
        if entry.tx.is_coinbase() {
            return Err(MempoolError::Coinbase(entry.txid));
        }

        if self.transactions.contains_key(&entry.txid) {
            return Err(MempoolError::AlreadyExists(entry.txid));
        }

        if entry.size > self.config.max_size / 10 {
            return Err(MempoolError::TooLarge {
                size: entry.size,
                max: self.config.max_size / 10,
            });
        }

        if entry.fee_per_kb() < self.config.min_fee_per_kb {
            return Err(MempoolError::FeeTooLow {
                fee_per_kb: entry.fee_per_kb(),
                min_per_kb: self.config.min_fee_per_kb,
            });
        }

        for input in &entry.tx.inputs {
            if let Some(existing) = self.spent_outpoints.get(&input.previous_output) {
                return Err(MempoolError::DoubleSpend {
                    txid: input.previous_output.txid,
                    index: input.previous_output.index,
                    by: *existing,
                });
            }
        }

        if self.transactions.len() >= self.config.max_transactions {
            self.evict_lowest_fee()?;
        }
        if *self.total_size.read() + entry.size > self.config.max_size {
            self.evict_for_size(entry.size)?;
        }

        entry.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ordering = FeeOrdering::new(entry.txid, entry.fee, entry.size, entry.sequence);

        for input in &entry.tx.inputs {
            self.spent_outpoints
                .insert(input.previous_output, entry.txid);
        }
        self.fee_order.write().insert(ordering);
        *self.total_size.write() += entry.size;
        self.transactions.insert(entry.txid, entry);

        debug!(count = self.transactions.len(), "transaction added to pool");
        Ok(())
    }

    /// Remove a transaction by ID.
    pub fn remove(&self, txid: &Hash) -> MempoolResult<PooledTransaction> {
        let (_, entry) = self
            .transactions
            .remove(txid)
            .ok_or(MempoolError::NotFound(*txid))?;

        for input in &entry.tx.inputs {
            self.spent_outpoints.remove(&input.previous_output);
        }
        let ordering = FeeOrdering::new(entry.txid, entry.fee, entry.size, entry.sequence);
        self.fee_order.write().remove(&ordering);
        *self.total_size.write() -= entry.size;

        debug!(
            count = self.transactions.len(),
            "transaction removed from pool"
        );
        Ok(entry)
    }

    /// Get a transaction by ID.
    pub fn get(&self, txid: &Hash) -> Option<PooledTransaction> {
        self.transactions.get(txid).map(|r| r.clone())
    }

    /// Check if a transaction is in the pool.
    pub fn contains(&self, txid: &Hash) -> bool {
        self.transactions.contains_key(txid)
    }

    /// Check whether an outpoint is spent by a pool transaction.
    pub fn is_outpoint_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent_outpoints.contains_key(outpoint)
    }

    /// The pool transaction spending an outpoint, if any.
    pub fn spending_tx(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.spent_outpoints.get(outpoint).map(|r| *r)
    }

    /// Transactions ordered by fee rate (highest first).
    pub fn by_fee(&self, limit: usize) -> Vec<PooledTransaction> {
        let order = self.fee_order.read();
        order
            .iter()
            .take(limit)
            .filter_map(|o| self.get(&o.txid))
            .collect()
    }

    /// IDs of transactions whose fee rate is at least `min_fee_per_kb`.
    pub fn ids_above_fee_rate(&self, min_fee_per_kb: i64) -> Vec<Hash> {
        self.transactions
            .iter()
            .filter(|r| r.fee_per_kb() >= min_fee_per_kb)
            .map(|r| *r.key())
            .collect()
    }

    /// All transaction IDs.
    pub fn all_ids(&self) -> Vec<Hash> {
        self.transactions.iter().map(|r| *r.key()).collect()
    }

    /// Pool statistics.
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            tx_count: self.transactions.len(),
            total_size: *self.total_size.read(),
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.transactions.clear();
        self.spent_outpoints.clear();
        self.fee_order.write().clear();
        *self.total_size.write() = 0;
        info!("mempool cleared");
    }

    /// Remove transactions made redundant by a connected block: the block's
    /// own transactions, plus any pool transaction that spends an outpoint
    /// the block consumed.
    pub fn remove_confirmed(&self, block_txs: &[Transaction]) -> Vec<Hash> {
        let mut removed = Vec::new();

        for tx in block_txs {
            let txid = tx.txid();
            if self.remove(&txid).is_ok() {
                removed.push(txid);
            }

            // Double spends of the block's inputs are no longer valid.
            for input in &tx.inputs {
                if input.previous_output.is_null() {
                    continue;
                }
                if let Some(conflicting) = self.spending_tx(&input.previous_output) {
                    if self.remove(&conflicting).is_ok() {
                        debug!(
                            tx = %conflicting,
                            "removed pool transaction conflicting with block"
                        );
                    }
                }
            }
        }

        removed
    }

    /// Remove transactions older than the configured expiry.
    pub fn remove_expired(&self) -> usize {
        let expiry = self.config.tx_expiry;
        let expired: Vec<Hash> = self
            .transactions
            .iter()
            .filter(|r| r.arrival.elapsed() > expiry)
            .map(|r| *r.key())
            .collect();

        let count = expired.len();
        for txid in expired {
            let _ = self.remove(&txid);
        }
        if count > 0 {
            debug!(count, "expired pool transactions removed");
        }
        count
    }

    fn evict_lowest_fee(&self) -> MempoolResult<()> {
        let lowest = {
            let order = self.fee_order.read();
            order.iter().next_back().map(|o| o.txid)
        };
        if let Some(txid) = lowest {
            self.remove(&txid)?;
            warn!(tx = %txid, "evicted lowest fee-rate transaction");
        }
        Ok(())
    }

    fn evict_for_size(&self, needed: usize) -> MempoolResult<()> {
        let mut freed = 0usize;
        while freed < needed {
            let lowest = {
                let order = self.fee_order.read();
                order.iter().next_back().map(|o| o.txid)
            };
            match lowest {
                Some(txid) => {
                    if let Ok(entry) = self.remove(&txid) {
                        freed += entry.size;
                    }
                }
                None => break,
            }
        }
        Ok(())
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_wire::{TxIn, TxOut};

    fn test_tx(tag: u8, outpoint_tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::new(Hash::from_bytes([outpoint_tag; 32]), 0),
                signature_script: vec![tag],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 1_000,
                pk_script: vec![tag; 4],
            }],
            lock_time: 0,
        }
    }

    fn entry(tag: u8, fee: i64) -> PooledTransaction {
        PooledTransaction::new(test_tx(tag, tag), fee)
    }

    #[test]
    fn test_add_and_get() {
        let pool = TxPool::with_defaults();
        let e = entry(1, 1_000);
        let txid = e.txid;

        pool.add(e).unwrap();

        assert!(pool.contains(&txid));
        assert_eq!(pool.get(&txid).unwrap().fee, 1_000);
    }

    #[test]
    fn test_duplicate_rejected() {
        let pool = TxPool::with_defaults();
        pool.add(entry(1, 1_000)).unwrap();

        let result = pool.add(entry(1, 1_000));
        assert!(matches!(result, Err(MempoolError::AlreadyExists(_))));
    }

    #[test]
    fn test_double_spend_detected() {
        let pool = TxPool::with_defaults();

        // Two distinct transactions spending the same outpoint.
        let tx1 = PooledTransaction::new(test_tx(1, 9), 1_000);
        let tx2 = PooledTransaction::new(test_tx(2, 9), 2_000);

        pool.add(tx1).unwrap();
        let result = pool.add(tx2);
        assert!(matches!(result, Err(MempoolError::DoubleSpend { .. })));
    }

    #[test]
    fn test_coinbase_rejected() {
        let pool = TxPool::with_defaults();
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::null(),
                signature_script: vec![1, 2, 3],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50_000,
                pk_script: vec![0xaa],
            }],
            lock_time: 0,
        };

        let result = pool.add(PooledTransaction::new(coinbase, 0));
        assert!(matches!(result, Err(MempoolError::Coinbase(_))));
    }

    #[test]
    fn test_fee_floor() {
        let config = MempoolConfig {
            min_fee_per_kb: 1_000_000,
            ..Default::default()
        };
        let pool = TxPool::new(config);

        let result = pool.add(entry(1, 1));
        assert!(matches!(result, Err(MempoolError::FeeTooLow { .. })));
    }

    #[test]
    fn test_capacity_evicts_lowest_fee_rate() {
        let config = MempoolConfig {
            max_transactions: 3,
            ..Default::default()
        };
        let pool = TxPool::new(config);

        let low = entry(1, 100);
        let low_id = low.txid;
        pool.add(low).unwrap();
        pool.add(entry(2, 2_000)).unwrap();
        pool.add(entry(3, 3_000)).unwrap();

        pool.add(entry(4, 4_000)).unwrap();

        assert!(!pool.contains(&low_id));
        assert_eq!(pool.stats().tx_count, 3);
    }

    #[test]
    fn test_remove_frees_outpoints() {
        let pool = TxPool::with_defaults();
        let e = entry(1, 1_000);
        let txid = e.txid;
        let outpoint = e.tx.inputs[0].previous_output;

        pool.add(e).unwrap();
        assert!(pool.is_outpoint_spent(&outpoint));

        pool.remove(&txid).unwrap();
        assert!(!pool.is_outpoint_spent(&outpoint));
    }

    #[test]
    fn test_remove_confirmed_clears_conflicts() {
        let pool = TxPool::with_defaults();

        // Pool holds a spend of outpoint [9;32]:0.
        let pooled = PooledTransaction::new(test_tx(1, 9), 1_000);
        let pooled_id = pooled.txid;
        pool.add(pooled).unwrap();

        // A block confirms a different spend of the same outpoint.
        let block_tx = test_tx(2, 9);
        let removed = pool.remove_confirmed(&[block_tx]);

        assert!(!pool.contains(&pooled_id));
        // The block tx itself was never pooled, so nothing reported there.
        assert!(removed.is_empty());
    }

    #[test]
    fn test_by_fee_order() {
        let pool = TxPool::with_defaults();
        pool.add(entry(1, 1_000)).unwrap();
        pool.add(entry(2, 3_000)).unwrap();
        pool.add(entry(3, 2_000)).unwrap();

        let ordered = pool.by_fee(10);
        assert_eq!(ordered.len(), 3);
        assert!(ordered[0].fee >= ordered[1].fee);
        assert!(ordered[1].fee >= ordered[2].fee);
    }

    #[test]
    fn test_ids_above_fee_rate() {
        let pool = TxPool::with_defaults();
        let cheap = entry(1, 150);
        let rich = entry(2, 10_000);
        let rich_id = rich.txid;

        let cheap_rate = cheap.fee_per_kb();
        pool.add(cheap).unwrap();
        pool.add(rich).unwrap();

        let ids = pool.ids_above_fee_rate(cheap_rate + 1);
        assert_eq!(ids, vec![rich_id]);
    }

    #[test]
    fn test_stats_and_clear() {
        let pool = TxPool::with_defaults();
        pool.add(entry(1, 1_000)).unwrap();
        pool.add(entry(2, 2_000)).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.tx_count, 2);
        assert!(stats.total_size > 0);

        pool.clear();
        assert_eq!(pool.stats().tx_count, 0);
        assert_eq!(pool.stats().total_size, 0);
    }
}
