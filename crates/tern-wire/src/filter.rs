//! Bloom filters for filtered-block service.
//!
//! Light peers load a filter describing the scripts and outpoints they care
//! about; the serving node then relays only matching transactions and answers
//! filtered-block requests with merkle blocks.

use crate::{Hash, Transaction, WireError, WireResult};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Maximum filter payload size in bytes.
pub const MAX_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions a filter may request.
pub const MAX_FILTER_HASH_FUNCS: u32 = 50;

/// Maximum size of a single `filteradd` element.
pub const MAX_FILTER_ADD_SIZE: usize = 520;

/// Body of a `filterload` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterLoad {
    /// Raw filter bits.
    pub data: Vec<u8>,
    /// Number of hash functions.
    pub hash_funcs: u32,
    /// Per-filter random tweak.
    pub tweak: u32,
}

/// A loaded bloom filter.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
}

impl BloomFilter {
    /// Build an empty filter sized for roughly `elements` entries.
    pub fn new(elements: usize, hash_funcs: u32, tweak: u32) -> Self {
        let bytes = (elements.max(1) * 2).min(MAX_FILTER_SIZE);
        Self {
            data: vec![0u8; bytes],
            hash_funcs: hash_funcs.clamp(1, MAX_FILTER_HASH_FUNCS),
            tweak,
        }
    }

    /// Validate and adopt a peer-supplied `filterload` body.
    pub fn from_load(load: FilterLoad) -> WireResult<Self> {
        if load.data.is_empty() || load.data.len() > MAX_FILTER_SIZE {
            return Err(WireError::FilterTooLarge {
                size: load.data.len(),
                max: MAX_FILTER_SIZE,
            });
        }
        if load.hash_funcs == 0 || load.hash_funcs > MAX_FILTER_HASH_FUNCS {
            return Err(WireError::TooManyFilterHashFuncs {
                funcs: load.hash_funcs,
                max: MAX_FILTER_HASH_FUNCS,
            });
        }
        Ok(Self {
            data: load.data,
            hash_funcs: load.hash_funcs,
            tweak: load.tweak,
        })
    }

    /// Export the filter as a `filterload` body.
    pub fn to_load(&self) -> FilterLoad {
        FilterLoad {
            data: self.data.clone(),
            hash_funcs: self.hash_funcs,
            tweak: self.tweak,
        }
    }

    fn bit_index(&self, func: u32, element: &[u8]) -> usize {
        let mut buf = Vec::with_capacity(8 + element.len());
        buf.put_u32_le(func.wrapping_mul(0xFBA4_C795).wrapping_add(self.tweak));
        buf.put_slice(element);
        let digest = Hash::digest(&buf);
        let word = u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("8 bytes"));
        (word % (self.data.len() as u64 * 8)) as usize
    }

    /// Add an element to the filter.
    pub fn insert(&mut self, element: &[u8]) {
        for func in 0..self.hash_funcs {
            let bit = self.bit_index(func, element);
            self.data[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Probabilistic membership test.
    pub fn contains(&self, element: &[u8]) -> bool {
        (0..self.hash_funcs).all(|func| {
            let bit = self.bit_index(func, element);
            self.data[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Check whether a transaction is relevant to this filter.
    ///
    /// Matches on the txid, any spent outpoint, and any output script. A
    /// matching output inserts its outpoint so that follow-up spends of it
    /// also match.
    pub fn matches_transaction(&mut self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        let mut matched = self.contains(txid.as_bytes());

        for (index, output) in tx.outputs.iter().enumerate() {
            if !output.pk_script.is_empty() && self.contains(&output.pk_script) {
                matched = true;
                self.insert(&outpoint_key(&txid, index as u32));
            }
        }

        if !matched {
            for input in &tx.inputs {
                let key = outpoint_key(
                    &input.previous_output.txid,
                    input.previous_output.index,
                );
                if self.contains(&key) {
                    matched = true;
                    break;
                }
            }
        }

        matched
    }
}

fn outpoint_key(txid: &Hash, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.put_slice(txid.as_bytes());
    key.put_u32_le(index);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutPoint, TxIn, TxOut};

    fn filter() -> BloomFilter {
        BloomFilter::new(16, 5, 0x1234)
    }

    #[test]
    fn test_insert_then_contains() {
        let mut f = filter();
        assert!(!f.contains(b"needle"));
        f.insert(b"needle");
        assert!(f.contains(b"needle"));
    }

    #[test]
    fn test_from_load_rejects_oversize() {
        let result = BloomFilter::from_load(FilterLoad {
            data: vec![0; MAX_FILTER_SIZE + 1],
            hash_funcs: 5,
            tweak: 0,
        });
        assert!(matches!(result, Err(WireError::FilterTooLarge { .. })));

        let result = BloomFilter::from_load(FilterLoad {
            data: vec![0; 32],
            hash_funcs: MAX_FILTER_HASH_FUNCS + 1,
            tweak: 0,
        });
        assert!(matches!(
            result,
            Err(WireError::TooManyFilterHashFuncs { .. })
        ));
    }

    #[test]
    fn test_matches_txid() {
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
        };
        let mut f = filter();
        assert!(!f.matches_transaction(&tx));

        f.insert(tx.txid().as_bytes());
        assert!(f.matches_transaction(&tx));
    }

    #[test]
    fn test_matching_output_chains_to_spend() {
        let script = vec![0xaa; 20];
        let funding = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOut {
                value: 1,
                pk_script: script.clone(),
            }],
            lock_time: 0,
        };

        let mut f = filter();
        f.insert(&script);
        assert!(f.matches_transaction(&funding));

        // The spend of the matched output now matches via the outpoint.
        let spend = Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::new(funding.txid(), 0),
                signature_script: vec![],
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        };
        assert!(f.matches_transaction(&spend));
    }
}
