//! Inventory vectors.

use crate::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of item an inventory vector announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvType {
    /// A transaction.
    Tx,
    /// A full block.
    Block,
    /// A block filtered through the peer's bloom filter.
    FilteredBlock,
    /// A transaction with witness data.
    WitnessTx,
    /// A block with witness data.
    WitnessBlock,
}

impl InvType {
    /// True for the transaction-shaped variants.
    pub fn is_tx(&self) -> bool {
        matches!(self, InvType::Tx | InvType::WitnessTx)
    }

    /// True for the block-shaped variants.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            InvType::Block | InvType::FilteredBlock | InvType::WitnessBlock
        )
    }
}

impl fmt::Display for InvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvType::Tx => write!(f, "tx"),
            InvType::Block => write!(f, "block"),
            InvType::FilteredBlock => write!(f, "filtered block"),
            InvType::WitnessTx => write!(f, "witness tx"),
            InvType::WitnessBlock => write!(f, "witness block"),
        }
    }
}

/// An inventory vector: a typed fingerprint of a block or transaction.
///
/// Equality is by (type, hash); a transaction and a block sharing a hash are
/// distinct inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvVect {
    /// Kind of item.
    pub inv_type: InvType,
    /// Identity hash of the item.
    pub hash: Hash,
}

impl InvVect {
    /// Create a new inventory vector.
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Self { inv_type, hash }
    }

    /// Shorthand for a transaction vector.
    pub fn tx(hash: Hash) -> Self {
        Self::new(InvType::Tx, hash)
    }

    /// Shorthand for a block vector.
    pub fn block(hash: Hash) -> Self {
        Self::new(InvType::Block, hash)
    }
}

impl fmt::Display for InvVect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inv_type, self.hash)
    }
}
