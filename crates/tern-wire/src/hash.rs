//! Content-addressed identifiers.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte content address (Blake2b-256 digest).
///
/// Identifies blocks and transactions throughout the protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// The all-zero hash, used as the genesis parent and as a "no stop" marker.
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    /// Hash arbitrary bytes with Blake2b-256.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Construct from a raw byte array.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// True for the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let a = Hash::digest(b"tern");
        let b = Hash::digest(b"tern");
        assert_eq!(a, b);

        let c = Hash::digest(b"tern2");
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::digest(b"x").is_zero());
    }

    #[test]
    fn test_display_is_hex() {
        let h = Hash::from_bytes([0xab; 32]);
        assert_eq!(h.to_string(), "ab".repeat(32));
    }
}
