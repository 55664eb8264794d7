//! Typed protocol messages.
//!
//! The byte-level codec lives with the connection layer; these are the typed
//! bodies it produces and consumes, identified by their command names.

use crate::{
    Block, BlockHeader, BlockLocator, FilterLoad, Hash, InvVect, Transaction, WireError,
    WireResult, MAX_HEADERS_PER_MSG, MAX_INV_PER_MSG,
};
use serde::{Deserialize, Serialize};

/// A filtered block: the header plus the transactions that matched the
/// requesting peer's bloom filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBlock {
    /// Header of the filtered block.
    pub header: BlockHeader,
    /// Total transactions in the full block.
    pub total_transactions: u32,
    /// Identity hashes of the matched transactions, in block order.
    pub matched_hashes: Vec<Hash>,
}

/// A protocol message visible to the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Inventory announcement.
    Inv(Vec<InvVect>),
    /// Request for announced items.
    GetData(Vec<InvVect>),
    /// Items we were asked for but do not have.
    NotFound(Vec<InvVect>),
    /// Request for block inventory after a locator.
    GetBlocks {
        locator: BlockLocator,
        stop_hash: Hash,
    },
    /// Request for headers after a locator.
    GetHeaders {
        locator: BlockLocator,
        stop_hash: Hash,
    },
    /// A batch of headers.
    Headers(Vec<BlockHeader>),
    /// A transaction.
    Tx(Transaction),
    /// A full block.
    Block(Block),
    /// A filtered block.
    MerkleBlock(MerkleBlock),
    /// Request for the remote mempool's inventory.
    Mempool,
    /// Load a bloom filter.
    FilterLoad(FilterLoad),
    /// Add one element to the loaded filter.
    FilterAdd { data: Vec<u8> },
    /// Drop the loaded filter.
    FilterClear,
    /// Minimum fee rate (base units per kilobyte) for tx relay.
    FeeFilter { min_fee_per_kb: i64 },
    /// Request compact filters for a height range.
    GetCFilters {
        filter_type: u8,
        start_height: u32,
        stop_hash: Hash,
    },
    /// Request compact filter headers for a height range.
    GetCFHeaders {
        filter_type: u8,
        start_height: u32,
        stop_hash: Hash,
    },
    /// Request evenly spaced compact filter header checkpoints.
    GetCFCheckpt { filter_type: u8, stop_hash: Hash },
}

impl Message {
    /// The protocol command name for this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetBlocks { .. } => "getblocks",
            Message::GetHeaders { .. } => "getheaders",
            Message::Headers(_) => "headers",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Mempool => "mempool",
            Message::FilterLoad(_) => "filterload",
            Message::FilterAdd { .. } => "filteradd",
            Message::FilterClear => "filterclear",
            Message::FeeFilter { .. } => "feefilter",
            Message::GetCFilters { .. } => "getcfilters",
            Message::GetCFHeaders { .. } => "getcfheaders",
            Message::GetCFCheckpt { .. } => "getcfcheckpt",
        }
    }

    /// Validate body-level size limits.
    pub fn validate(&self) -> WireResult<()> {
        match self {
            Message::Inv(inv) | Message::GetData(inv) | Message::NotFound(inv) => {
                if inv.len() > MAX_INV_PER_MSG {
                    return Err(WireError::TooManyInv {
                        count: inv.len(),
                        max: MAX_INV_PER_MSG,
                    });
                }
            }
            Message::Headers(headers) => {
                if headers.len() > MAX_HEADERS_PER_MSG {
                    return Err(WireError::TooManyHeaders {
                        count: headers.len(),
                        max: MAX_HEADERS_PER_MSG,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Message::Mempool.command(), "mempool");
        assert_eq!(Message::Inv(vec![]).command(), "inv");
        assert_eq!(
            Message::FeeFilter { min_fee_per_kb: 10 }.command(),
            "feefilter"
        );
        assert_eq!(Message::FilterClear.command(), "filterclear");
    }

    #[test]
    fn test_validate_inv_limit() {
        let inv = vec![InvVect::tx(Hash::ZERO); MAX_INV_PER_MSG + 1];
        assert!(matches!(
            Message::Inv(inv).validate(),
            Err(WireError::TooManyInv { .. })
        ));
        assert!(Message::Inv(vec![InvVect::tx(Hash::ZERO)]).validate().is_ok());
    }

    #[test]
    fn test_validate_headers_limit() {
        let header = BlockHeader {
            version: 1,
            prev_block: Hash::ZERO,
            merkle_root: Hash::ZERO,
            timestamp: 0,
            bits: 0,
            nonce: 0,
        };
        let headers = vec![header; MAX_HEADERS_PER_MSG + 1];
        assert!(matches!(
            Message::Headers(headers).validate(),
            Err(WireError::TooManyHeaders { .. })
        ));
    }
}
