//! Deterministic test data: header chains, blocks, and spend graphs.

use tern_wire::{
    Block, BlockHeader, Hash, OutPoint, Transaction, TxIn, TxOut,
};

/// Compact bits whose expanded target exceeds every possible hash, so any
/// nonce satisfies proof of work.
pub const EASY_POW_BITS: u32 = 0x2200ffff;

/// Compact bits expanding to a zero target, which no hash satisfies.
pub const IMPOSSIBLE_POW_BITS: u32 = 0x0100_0001;

/// Fixed timestamp base for generated chains.
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// The deterministic genesis coinbase.
pub fn genesis_coinbase() -> Transaction {
    coinbase(0)
}

/// A coinbase transaction unique per height.
pub fn coinbase(height: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_output: OutPoint::null(),
            signature_script: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 50_000_000,
            pk_script: vec![0x51, height as u8],
        }],
        lock_time: 0,
    }
}

/// The deterministic genesis block.
pub fn genesis_block() -> Block {
    let coinbase = genesis_coinbase();
    Block {
        header: BlockHeader {
            version: 1,
            prev_block: Hash::ZERO,
            merkle_root: coinbase.txid(),
            timestamp: GENESIS_TIME,
            bits: EASY_POW_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    }
}

/// Generate `count` linked blocks extending `parent_hash`, one coinbase
/// each, all satisfying the easy proof-of-work target.
pub fn make_chain(parent_hash: Hash, parent_height: u32, count: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut prev = parent_hash;
    for i in 0..count {
        let height = parent_height + i as u32 + 1;
        let coinbase = coinbase(height);
        let header = BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: coinbase.txid(),
            timestamp: GENESIS_TIME + height as u64 * 60,
            bits: EASY_POW_BITS,
            nonce: height as u64,
        };
        prev = header.block_hash();
        blocks.push(Block {
            header,
            transactions: vec![coinbase],
        });
    }
    blocks
}

/// Headers of a generated chain.
pub fn headers_of(blocks: &[Block]) -> Vec<BlockHeader> {
    blocks.iter().map(|b| b.header).collect()
}

/// Generate a linked header chain where the header at `bad_index` claims an
/// impossible target. Later headers still link correctly, so the only
/// failure is proof of work at `bad_index`.
pub fn headers_with_bad_pow(
    parent_hash: Hash,
    parent_height: u32,
    count: usize,
    bad_index: usize,
) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut prev = parent_hash;
    for i in 0..count {
        let height = parent_height + i as u32 + 1;
        let header = BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: Hash::digest(&height.to_le_bytes()),
            timestamp: GENESIS_TIME + height as u64 * 60,
            bits: if i == bad_index {
                IMPOSSIBLE_POW_BITS
            } else {
                EASY_POW_BITS
            },
            nonce: height as u64,
        };
        prev = header.block_hash();
        headers.push(header);
    }
    headers
}

/// A transaction spending one output of `parent`, tagged for uniqueness.
pub fn spend(parent: Hash, vout: u32, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_output: OutPoint::new(parent, vout),
            signature_script: vec![tag],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 40_000_000,
            pk_script: vec![0x52, tag],
        }],
        lock_time: 0,
    }
}

/// A transaction the test pool classifies as malicious.
pub fn malicious_tx(tag: u8) -> Transaction {
    Transaction {
        version: -1,
        inputs: vec![TxIn {
            previous_output: OutPoint::new(Hash::digest(&[tag]), 0),
            signature_script: vec![tag],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 1,
            pk_script: vec![tag],
        }],
        lock_time: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_wire::{check_proof_of_work, compact_to_target};

    #[test]
    fn test_make_chain_links() {
        let genesis = genesis_block();
        let blocks = make_chain(genesis.block_hash(), 0, 5);

        assert_eq!(blocks[0].header.prev_block, genesis.block_hash());
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.prev_block, pair[0].block_hash());
        }
    }

    #[test]
    fn test_chain_satisfies_easy_pow() {
        let limit = compact_to_target(EASY_POW_BITS);
        let genesis = genesis_block();
        for block in make_chain(genesis.block_hash(), 0, 10) {
            assert!(check_proof_of_work(&block.header, &limit));
        }
    }

    #[test]
    fn test_bad_pow_generator_breaks_only_the_target_header() {
        let limit = compact_to_target(EASY_POW_BITS);
        let headers = headers_with_bad_pow(Hash::digest(b"parent"), 0, 50, 37);

        for (i, header) in headers.iter().enumerate() {
            assert_eq!(check_proof_of_work(header, &limit), i != 37, "index {i}");
        }
        // Linkage intact throughout.
        for pair in headers.windows(2) {
            assert_eq!(pair[1].prev_block, pair[0].block_hash());
        }
    }

    #[test]
    fn test_coinbase_uniqueness() {
        assert_ne!(coinbase(1).txid(), coinbase(2).txid());
        assert!(coinbase(1).is_coinbase());
    }
}
