//! Proof-of-work target arithmetic.

use crate::{BlockHeader, Hash};
use num_bigint::BigUint;

/// Expand a compact-encoded difficulty target into a full 256-bit integer.
///
/// The compact form packs a target as `mantissa * 256^(exponent - 3)` with a
/// 3-byte mantissa. A set sign bit or zero mantissa yields a zero target,
/// which no hash can satisfy.
pub fn compact_to_target(bits: u32) -> BigUint {
    let mantissa = bits & 0x007f_ffff;
    let negative = bits & 0x0080_0000 != 0;
    let exponent = (bits >> 24) as u32;

    if mantissa == 0 || negative {
        return BigUint::default();
    }

    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Interpret a hash as a big-endian 256-bit integer.
pub fn hash_to_big(hash: &Hash) -> BigUint {
    BigUint::from_bytes_be(hash.as_bytes())
}

/// Check a header's proof of work against its own claimed target and the
/// chain-wide limit.
///
/// Returns false when the claimed target exceeds `pow_limit` (a trivially
/// easy claim) or when the header hash does not meet the claimed target.
pub fn check_proof_of_work(header: &BlockHeader, pow_limit: &BigUint) -> bool {
    let target = compact_to_target(header.bits);
    if target == BigUint::default() || &target > pow_limit {
        return false;
    }
    hash_to_big(&header.block_hash()) <= target
}
