//! Block headers.

use crate::Hash;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// A block header.
///
/// The hash of the encoded header is the block's identity and the value
/// checked against the proof-of-work target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block header.
    pub prev_block: Hash,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash,
    /// Block timestamp (seconds since the epoch).
    pub timestamp: u64,
    /// Compact-encoded proof-of-work target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Compute the header's identity hash.
    pub fn block_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(96);
        self.encode_for_hash(&mut buf);
        Hash::digest(&buf)
    }

    /// Deterministic preimage encoding for hashing.
    ///
    /// This is the content identity of the header, not a wire format.
    fn encode_for_hash(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.version);
        buf.put_slice(self.prev_block.as_bytes());
        buf.put_slice(self.merkle_root.as_bytes());
        buf.put_u64_le(self.timestamp);
        buf.put_u32_le(self.bits);
        buf.put_u64_le(self.nonce);
    }
}
