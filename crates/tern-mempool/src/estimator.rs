//! Fee estimation from observed confirmations.
//!
//! The estimator watches transactions enter the pool and records, when a
//! block confirms them, how many blocks they waited at which fee rate. The
//! estimate for a confirmation target is the median observed fee rate among
//! transactions that confirmed within that many blocks.

use parking_lot::Mutex;
use std::collections::HashMap;
use tern_wire::Hash;
use tracing::debug;

/// Highest confirmation target tracked.
pub const MAX_CONFIRMATION_TARGET: usize = 25;

/// Observations kept per confirmation bucket.
const MAX_OBSERVATIONS_PER_BUCKET: usize = 200;

#[derive(Debug, Clone, Copy)]
struct PendingTx {
    fee_per_kb: i64,
    observed_height: u32,
}

struct EstimatorState {
    /// Pool transactions awaiting confirmation.
    pending: HashMap<Hash, PendingTx>,
    /// Fee rates by blocks-to-confirm bucket (1-indexed).
    buckets: Vec<Vec<i64>>,
    /// Height of the last registered block.
    last_height: u32,
}

/// Median-of-observations fee estimator.
pub struct FeeEstimator {
    state: Mutex<EstimatorState>,
}

impl FeeEstimator {
    /// Create an empty estimator.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EstimatorState {
                pending: HashMap::new(),
                buckets: vec![Vec::new(); MAX_CONFIRMATION_TARGET],
                last_height: 0,
            }),
        }
    }

    /// Record a transaction entering the pool at the current height.
    pub fn observe_transaction(&self, txid: Hash, fee_per_kb: i64) {
        let mut state = self.state.lock();
        let height = state.last_height;
        state.pending.insert(
            txid,
            PendingTx {
                fee_per_kb,
                observed_height: height,
            },
        );
    }

    /// A transaction left the pool without confirming (evicted, conflicted).
    pub fn forget_transaction(&self, txid: &Hash) {
        self.state.lock().pending.remove(txid);
    }

    /// Register a connected block and settle observations for the
    /// transactions it confirmed.
    pub fn register_block(&self, height: u32, confirmed: &[Hash]) {
        let mut state = self.state.lock();
        state.last_height = height;

        for txid in confirmed {
            let Some(pending) = state.pending.remove(txid) else {
                continue;
            };
            let waited = height.saturating_sub(pending.observed_height).max(1) as usize;
            if waited > MAX_CONFIRMATION_TARGET {
                continue;
            }
            let bucket = &mut state.buckets[waited - 1];
            if bucket.len() >= MAX_OBSERVATIONS_PER_BUCKET {
                bucket.remove(0);
            }
            bucket.push(pending.fee_per_kb);
        }

        debug!(height, confirmed = confirmed.len(), "fee estimator updated");
    }

    /// Estimated fee rate (base units per kB) to confirm within `target`
    /// blocks. None when there is not enough history.
    pub fn estimate_fee_per_kb(&self, target: usize) -> Option<i64> {
        let target = target.clamp(1, MAX_CONFIRMATION_TARGET);
        let state = self.state.lock();

        let mut rates: Vec<i64> = state.buckets[..target]
            .iter()
            .flat_map(|bucket| bucket.iter().copied())
            .collect();
        if rates.is_empty() {
            return None;
        }
        rates.sort_unstable();
        Some(rates[rates.len() / 2])
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new()
    }
}
