use presale_types::{
    Address, ContributionId, ContributionStatus, Digest, RoundId, RoundStatus, SettlementStep,
};

/// Errors from store operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("round already exists: {0}")]
    DuplicateRound(RoundId),

    #[error("contribution not found: {0}")]
    ContributionNotFound(ContributionId),

    #[error("contribution {id} is {actual:?}, expected {expected:?}")]
    ContributionConflict {
        id: ContributionId,
        expected: ContributionStatus,
        actual: ContributionStatus,
    },

    /// Compare-and-set on the round status lost.
    #[error("round {round} is {actual}, expected {expected}")]
    StatusConflict {
        round: RoundId,
        expected: RoundStatus,
        actual: RoundStatus,
    },

    /// The requested status is not a legal successor of the current one.
    #[error("round {round} cannot move from {from} to {to}")]
    IllegalTransition {
        round: RoundId,
        from: RoundStatus,
        to: RoundStatus,
    },

    /// Compare-and-set on the settlement step lost.
    #[error("round {round} settlement is at {actual}, expected {expected}")]
    StepConflict {
        round: RoundId,
        expected: SettlementStep,
        actual: SettlementStep,
    },

    #[error("round {round} already committed root {committed}, refusing {submitted}")]
    RootConflict {
        round: RoundId,
        committed: Digest,
        submitted: Digest,
    },

    #[error("no refund recorded for {contributor} in round {round}")]
    RefundNotFound { round: RoundId, contributor: Address },

    #[error("refund for {contributor} in round {round} was already paid")]
    RefundAlreadyPaid { round: RoundId, contributor: Address },

    #[error("refund for {contributor} in round {round} is already in flight")]
    RefundInFlight { round: RoundId, contributor: Address },

    #[error("refund for {contributor} in round {round} was not reserved")]
    RefundNotReserved { round: RoundId, contributor: Address },

    #[error("{wallet} already claimed in round {round}")]
    AlreadyClaimed { round: RoundId, wallet: Address },

    #[error("claim for {wallet} in round {round} is already in flight")]
    ClaimInFlight { round: RoundId, wallet: Address },

    #[error("no fee split recorded for round {0}")]
    FeeSplitNotFound(RoundId),

    #[error("fee split for round {0} was already processed")]
    FeeSplitProcessed(RoundId),

    #[error("referral payout for round {0} is already in flight")]
    FeeSplitInFlight(RoundId),

    #[error("arithmetic overflow updating {0}")]
    Overflow(&'static str),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
