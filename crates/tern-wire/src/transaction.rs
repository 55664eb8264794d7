//! Transactions and blocks.

use crate::{BlockHeader, Hash};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// A reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction the output belongs to.
    pub txid: Hash,
    /// Output index within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// Create a new outpoint.
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    /// The null outpoint used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash::ZERO,
            index: u32::MAX,
        }
    }

    /// True for the coinbase null outpoint.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent.
    pub previous_output: OutPoint,
    /// Spending script.
    pub signature_script: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in base units.
    pub value: i64,
    /// Locking script.
    pub pk_script: Vec<u8>,
}

/// A transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction version.
    pub version: i32,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Earliest time or height the transaction may be mined.
    pub lock_time: u32,
}

impl Transaction {
    /// Compute the transaction's identity hash.
    pub fn txid(&self) -> Hash {
        let mut buf = Vec::with_capacity(128);
        self.encode_for_hash(&mut buf);
        Hash::digest(&buf)
    }

    /// True when this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Approximate serialized size in bytes, used for fee-rate accounting.
    pub fn size(&self) -> usize {
        let mut size = 4 + 4 + 2;
        for input in &self.inputs {
            size += 36 + 4 + input.signature_script.len();
        }
        for output in &self.outputs {
            size += 8 + output.pk_script.len();
        }
        size
    }

    fn encode_for_hash(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.version);
        buf.put_u32_le(self.inputs.len() as u32);
        for input in &self.inputs {
            buf.put_slice(input.previous_output.txid.as_bytes());
            buf.put_u32_le(input.previous_output.index);
            buf.put_u32_le(input.signature_script.len() as u32);
            buf.put_slice(&input.signature_script);
            buf.put_u32_le(input.sequence);
        }
        buf.put_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            buf.put_i64_le(output.value);
            buf.put_u32_le(output.pk_script.len() as u32);
            buf.put_slice(&output.pk_script);
        }
        buf.put_u32_le(self.lock_time);
    }
}

/// A full block: header plus ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Transactions, coinbase first.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block's identity hash.
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }
}
