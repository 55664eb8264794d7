//! Block locators.

use crate::Hash;
use serde::{Deserialize, Serialize};

/// An exponentially spaced list of block hashes from a tip back to genesis.
///
/// A peer scans the list front to back for the first hash it recognizes,
/// giving both sides a common ancestor without transferring the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockLocator(pub Vec<Hash>);

impl BlockLocator {
    /// Create a locator from an ordered hash list (tip first).
    pub fn new(hashes: Vec<Hash>) -> Self {
        Self(hashes)
    }

    /// Number of hashes in the locator.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the locator carries no hashes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate hashes tip-first.
    pub fn iter(&self) -> impl Iterator<Item = &Hash> {
        self.0.iter()
    }
}

/// Heights to include in a locator for a chain whose tip is at `height`.
///
/// The most recent 10 blocks are listed individually; after that the step
/// doubles each entry, and height 0 (genesis) is always last.
pub fn locator_indexes(height: u32) -> Vec<u32> {
    let mut indexes = Vec::with_capacity(12 + (height as f64 + 1.0).log2() as usize);

    let mut step = 1u32;
    let mut current = height as i64;
    while current > 0 {
        indexes.push(current as u32);
        if indexes.len() >= 10 {
            step = step.saturating_mul(2);
        }
        current -= step as i64;
    }
    indexes.push(0);
    indexes
}
