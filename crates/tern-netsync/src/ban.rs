//! Misbehavior scores for peer protocol violations.
//!
//! Violations accumulate per peer; crossing the ban threshold disconnects
//! the peer and marks it banned. Critical violations ban immediately.

/// Score accumulated before a peer is banned.
pub const BAN_THRESHOLD: u32 = 100;

/// Why a peer's misbehavior score was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisbehaviorReason {
    /// Header failed proof-of-work or linkage validation.
    InvalidHeader,
    /// Block failed consensus validation.
    InvalidBlock,
    /// Transaction with a malicious encoding or forged proof of work.
    MaliciousTransaction,
    /// Message body exceeded a protocol size limit.
    OversizedMessage,
    /// Header batch contradicted a hard-coded checkpoint.
    CheckpointMismatch,
    /// Bloom filter message from a peer not advertising the bloom service.
    FilterWithoutService,
    /// Malformed bloom filter payload.
    InvalidFilter,
    /// Delivered data nobody asked for.
    UnrequestedData,
    /// Nonsensical fee filter value.
    InvalidFeeFilter,
}

impl MisbehaviorReason {
    /// Score added for this violation.
    pub fn score(&self) -> u32 {
        match self {
            MisbehaviorReason::InvalidHeader => BAN_THRESHOLD,
            MisbehaviorReason::InvalidBlock => BAN_THRESHOLD,
            MisbehaviorReason::MaliciousTransaction => BAN_THRESHOLD,
            MisbehaviorReason::OversizedMessage => BAN_THRESHOLD,
            MisbehaviorReason::CheckpointMismatch => BAN_THRESHOLD,
            MisbehaviorReason::FilterWithoutService => BAN_THRESHOLD,
            MisbehaviorReason::InvalidFilter => BAN_THRESHOLD,
            MisbehaviorReason::UnrequestedData => 20,
            MisbehaviorReason::InvalidFeeFilter => 10,
        }
    }

    /// True when a single occurrence warrants an immediate ban.
    pub fn is_critical(&self) -> bool {
        self.score() >= BAN_THRESHOLD
    }
}

impl std::fmt::Display for MisbehaviorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MisbehaviorReason::InvalidHeader => write!(f, "invalid header"),
            MisbehaviorReason::InvalidBlock => write!(f, "invalid block"),
            MisbehaviorReason::MaliciousTransaction => write!(f, "malicious transaction"),
            MisbehaviorReason::OversizedMessage => write!(f, "oversized message"),
            MisbehaviorReason::CheckpointMismatch => write!(f, "checkpoint mismatch"),
            MisbehaviorReason::FilterWithoutService => write!(f, "filter without bloom service"),
            MisbehaviorReason::InvalidFilter => write!(f, "invalid bloom filter"),
            MisbehaviorReason::UnrequestedData => write!(f, "unrequested data"),
            MisbehaviorReason::InvalidFeeFilter => write!(f, "invalid fee filter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violations_ban_immediately() {
        assert!(MisbehaviorReason::InvalidHeader.is_critical());
        assert!(MisbehaviorReason::OversizedMessage.is_critical());
        assert!(MisbehaviorReason::FilterWithoutService.is_critical());
    }

    #[test]
    fn test_minor_violations_accumulate() {
        assert!(!MisbehaviorReason::UnrequestedData.is_critical());
        assert!(!MisbehaviorReason::InvalidFeeFilter.is_critical());

        // Five unrequested deliveries cross the threshold.
        let total: u32 = (0..5).map(|_| MisbehaviorReason::UnrequestedData.score()).sum();
        assert!(total >= BAN_THRESHOLD);
    }
}
