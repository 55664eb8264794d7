//! The transient header chain driving headers-first sync.
//!
//! Headers arrive in batches, are pre-validated for proof of work and
//! linkage, and then schedule block-body downloads in order. Blocks are
//! popped off the front strictly in sequence as they are handed to the
//! validator, so the validator never sees a block before its parent.

use num_bigint::BigUint;
use std::collections::{HashSet, VecDeque};
use tern_wire::{check_proof_of_work, BlockHeader, Hash};
use thiserror::Error;

/// A batch validation failure. The whole batch is rejected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// A header's hash does not satisfy its claimed target, or the claim
    /// exceeds the chain limit.
    #[error("header {index} has invalid proof of work")]
    BadProofOfWork { index: usize },

    /// A header does not extend the preceding one.
    #[error("header {index} does not link to its parent")]
    BrokenLinkage { index: usize },
}

/// One pre-validated header awaiting its block body.
#[derive(Debug, Clone)]
pub struct HeaderNode {
    /// Header hash.
    pub hash: Hash,
    /// Height this header will occupy.
    pub height: u32,
    /// The header itself.
    pub header: BlockHeader,
    /// Whether the block body has been scheduled (requested or buffered).
    pub scheduled: bool,
}

/// Strictly linked run of pre-validated headers ahead of the validator tip.
#[derive(Debug, Default)]
pub struct HeaderChain {
    nodes: VecDeque<HeaderNode>,
    index: HashSet<Hash>,
}

impl HeaderChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of headers awaiting block bodies.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no headers are pending.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The newest pending header.
    pub fn tip(&self) -> Option<&HeaderNode> {
        self.nodes.back()
    }

    /// The oldest pending header: the next block owed to the validator.
    pub fn front(&self) -> Option<&HeaderNode> {
        self.nodes.front()
    }

    /// Whether a header is pending.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains(hash)
    }

    /// Validate a batch against an expected parent: every header must link
    /// to its predecessor and satisfy proof of work. All-or-nothing.
    pub fn validate_batch(
        headers: &[BlockHeader],
        parent_hash: Hash,
        parent_height: u32,
        pow_limit: &BigUint,
    ) -> Result<Vec<HeaderNode>, HeaderError> {
        let mut nodes = Vec::with_capacity(headers.len());
        let mut expected_parent = parent_hash;

        for (index, header) in headers.iter().enumerate() {
            if header.prev_block != expected_parent {
                return Err(HeaderError::BrokenLinkage { index });
            }
            if !check_proof_of_work(header, pow_limit) {
                return Err(HeaderError::BadProofOfWork { index });
            }

            let hash = header.block_hash();
            nodes.push(HeaderNode {
                hash,
                height: parent_height + index as u32 + 1,
                header: *header,
                scheduled: false,
            });
            expected_parent = hash;
        }

        Ok(nodes)
    }

    /// Append validated nodes.
    pub fn extend(&mut self, nodes: Vec<HeaderNode>) {
        for node in nodes {
            self.index.insert(node.hash);
            self.nodes.push_back(node);
        }
    }

    /// Draw up to `max` block hashes to request, in chain order.
    ///
    /// Nodes for which `already_buffered` is true are marked satisfied and
    /// skipped; everything returned is marked scheduled.
    pub fn next_to_schedule(
        &mut self,
        max: usize,
        already_buffered: impl Fn(&Hash) -> bool,
    ) -> Vec<Hash> {
        let mut scheduled = Vec::new();
        for node in self.nodes.iter_mut() {
            if scheduled.len() >= max {
                break;
            }
            if node.scheduled {
                continue;
            }
            if already_buffered(&node.hash) {
                node.scheduled = true;
                continue;
            }
            node.scheduled = true;
            scheduled.push(node.hash);
        }
        scheduled
    }

    /// Un-mark nodes whose requests were released, so a new sync peer can be
    /// asked for them.
    pub fn unschedule(&mut self, hashes: &HashSet<Hash>) {
        for node in self.nodes.iter_mut() {
            if hashes.contains(&node.hash) {
                node.scheduled = false;
            }
        }
    }

    /// Pop the oldest pending header.
    pub fn pop_front(&mut self) -> Option<HeaderNode> {
        let node = self.nodes.pop_front();
        if let Some(node) = &node {
            self.index.remove(&node.hash);
        }
        node
    }

    /// Drop all pending headers.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }
}
