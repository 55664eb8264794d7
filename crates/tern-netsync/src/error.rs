//! Sync error taxonomy.

use crate::ban::MisbehaviorReason;
use crate::peer::PeerId;
use tern_wire::Hash;
use thiserror::Error;

/// Errors produced by the sync engine.
///
/// One peer's error never tears down another peer's processing: the decision
/// loop classifies every collaborator failure into one of these and absorbs
/// all but internal faults.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A peer violated the protocol; its score was raised and it may be banned.
    #[error("peer {peer} misbehaved: {reason}")]
    PeerMisbehavior {
        peer: PeerId,
        reason: MisbehaviorReason,
    },

    /// A transaction was not accepted for a transient, non-punishable reason.
    #[error("transaction {txid} dropped: {reason}")]
    TransientTx { txid: Hash, reason: String },

    /// The work was already done; the duplicate is dropped silently.
    #[error("duplicate work")]
    DuplicateWork,

    /// A caller-submitted block was rejected by the validator.
    #[error("rejected by validator: {0}")]
    Validation(String),

    /// A collaborator failed internally (disk, corruption). Surfaced upward.
    #[error("internal fault: {0}")]
    InternalFault(String),

    /// The event queue is closed; the manager is shutting down.
    #[error("sync manager is shutting down")]
    Shutdown,
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
