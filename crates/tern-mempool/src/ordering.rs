//! Transaction ordering by fee rate.

use std::cmp::Ordering;
use tern_wire::Hash;

/// Fee information used to order pool transactions.
#[derive(Debug, Clone)]
pub struct FeeOrdering {
    /// Transaction ID.
    pub txid: Hash,
    /// Transaction fee in base units.
    pub fee: i64,
    /// Transaction size in bytes.
    pub size: usize,
    /// Arrival sequence number (monotonic per pool).
    pub sequence: u64,
}

impl FeeOrdering {
    /// Create a new fee ordering entry.
    pub fn new(txid: Hash, fee: i64, size: usize, sequence: u64) -> Self {
        Self {
            txid,
            fee,
            size,
            sequence,
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

impl PartialEq for FeeOrdering {
    fn eq(&self, other: &Self) -> bool {
        self.txid == other.txid
    }
}

impl Eq for FeeOrdering {}

impl PartialOrd for FeeOrdering {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeeOrdering {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher fee rate first; ties broken by earlier arrival, then txid so
        // the ordering is total.
        match other.fee_per_kb().cmp(&self.fee_per_kb()) {
            Ordering::Equal => match self.sequence.cmp(&other.sequence) {
                Ordering::Equal => self.txid.cmp(&other.txid),
                ord => ord,
            },
            ord => ord,
        }
    }
}
