//! # tern-mempool
//!
//! Transaction memory pool for the Tern chain.
//!
//! This crate provides:
//! - Transaction storage with fee-rate ordering
//! - Double-spend detection against pooled spends
//! - Size limits and lowest-fee-rate eviction
//! - Expiry of stale transactions
//! - Confirmation-based fee estimation

mod error;
mod estimator;
mod ordering;
mod pool;

pub use error::{MempoolError, MempoolResult};
pub use estimator::{FeeEstimator, MAX_CONFIRMATION_TARGET};
pub use ordering::FeeOrdering;
pub use pool::{MempoolConfig, MempoolStats, PooledTransaction, TxPool};

use std::time::Duration;

/// Default maximum mempool size in bytes.
pub const DEFAULT_MAX_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Default maximum number of transactions.
pub const DEFAULT_MAX_TXS: usize = 10_000;

/// Default transaction expiry.
pub const DEFAULT_TX_EXPIRY: Duration = Duration::from_secs(3600);
