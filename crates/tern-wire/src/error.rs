//! Wire vocabulary errors.

use thiserror::Error;

/// Errors raised while validating message bodies.
#[derive(Error, Debug)]
pub enum WireError {
    /// Inventory list exceeds the per-message limit.
    #[error("too many inventory vectors: {count} (max {max})")]
    TooManyInv { count: usize, max: usize },

    /// Headers list exceeds the per-message limit.
    #[error("too many headers: {count} (max {max})")]
    TooManyHeaders { count: usize, max: usize },

    /// Bloom filter payload too large.
    #[error("bloom filter of {size} bytes exceeds max {max}")]
    FilterTooLarge { size: usize, max: usize },

    /// Bloom filter requests too many hash functions.
    #[error("bloom filter requests {funcs} hash functions (max {max})")]
    TooManyFilterHashFuncs { funcs: u32, max: u32 },
}

/// Result type for wire validation.
pub type WireResult<T> = Result<T, WireError>;
