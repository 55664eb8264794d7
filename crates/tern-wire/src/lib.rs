//! # tern-wire
//!
//! Typed protocol vocabulary for the Tern chain.
//!
//! This crate provides:
//! - Content-addressed hashes for blocks and transactions
//! - Block headers, transactions, and inventory vectors
//! - Proof-of-work target arithmetic
//! - Block locators for chain-walk requests
//! - Bloom filters for the filtered-block service
//! - The typed message set the sync engine consumes

mod error;
mod filter;
mod hash;
mod header;
mod inv;
mod locator;
mod message;
mod pow;
mod transaction;

pub use error::{WireError, WireResult};
pub use filter::{
    BloomFilter, FilterLoad, MAX_FILTER_ADD_SIZE, MAX_FILTER_HASH_FUNCS, MAX_FILTER_SIZE,
};
pub use hash::{Hash, HASH_SIZE};
pub use header::BlockHeader;
pub use inv::{InvType, InvVect};
pub use locator::{locator_indexes, BlockLocator};
pub use message::{MerkleBlock, Message};
pub use pow::{check_proof_of_work, compact_to_target, hash_to_big};
pub use transaction::{Block, OutPoint, Transaction, TxIn, TxOut};

/// Maximum inventory vectors per `inv`/`getdata`/`notfound` message.
pub const MAX_INV_PER_MSG: usize = 50_000;

/// Maximum headers per `headers` message.
pub const MAX_HEADERS_PER_MSG: usize = 2_000;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 3;

/// First protocol version supporting the `feefilter` message.
pub const FEE_FILTER_VERSION: u32 = 2;

/// First protocol version supporting bloom-filtered service.
pub const BLOOM_VERSION: u32 = 2;

/// Service flags advertised during the peer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceFlags(pub u64);

impl ServiceFlags {
    /// No services.
    pub const NONE: ServiceFlags = ServiceFlags(0);
    /// Full-node service: can serve the complete block chain.
    pub const NETWORK: ServiceFlags = ServiceFlags(1 << 0);
    /// Bloom-filtered connections supported.
    pub const BLOOM: ServiceFlags = ServiceFlags(1 << 1);
    /// Witness data served.
    pub const WITNESS: ServiceFlags = ServiceFlags(1 << 2);

    /// True when every flag in `other` is set.
    pub fn has(&self, other: ServiceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ServiceFlags {
    type Output = ServiceFlags;

    fn bitor(self, rhs: ServiceFlags) -> ServiceFlags {
        ServiceFlags(self.0 | rhs.0)
    }
}
