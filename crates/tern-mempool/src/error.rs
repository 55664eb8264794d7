//! Error types for the mempool.

use tern_wire::Hash;
use thiserror::Error;

/// Mempool errors.
#[derive(Error, Debug)]
pub enum MempoolError {
    /// Transaction already exists in mempool.
    #[error("transaction already in mempool: {0}")]
    AlreadyExists(Hash),

    /// Double spend detected.
    #[error("double spend: outpoint {txid}:{index} already spent by {by}")]
    DoubleSpend { txid: Hash, index: u32, by: Hash },

    /// Transaction too large.
    #[error("transaction too large: {size} bytes, max {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// Fee rate below the pool's floor.
    #[error("fee rate too low: {fee_per_kb} per kB, minimum {min_per_kb}")]
    FeeTooLow { fee_per_kb: i64, min_per_kb: i64 },

    /// Coinbase transactions are never pool-eligible.
    #[error("coinbase transaction {0} rejected from pool")]
    Coinbase(Hash),

    /// Transaction not found.
    #[error("transaction not found: {0}")]
    NotFound(Hash),
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
