use std::fmt;

use presale_alloc::ValidationError;
use presale_crypto::CryptoError;
use presale_ledger::LedgerError;
use presale_store::StoreError;
use presale_types::{
    Address, Amount, ContributionId, ContributionStatus, Digest, Permission, RoundId, RoundStatus,
    SettlementStep,
};

/// The state machine refused a transition. Nothing was applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("round {round} is {actual}, expected {expected}")]
    WrongStatus {
        round: RoundId,
        expected: RoundStatus,
        actual: RoundStatus,
    },

    #[error("round {round} cannot move from {from} to {to}")]
    IllegalTransition {
        round: RoundId,
        from: RoundStatus,
        to: RoundStatus,
    },

    #[error("round {round} is already finalized as {status}")]
    AlreadyFinalized { round: RoundId, status: RoundStatus },

    #[error("round {0} has ended and can no longer be cancelled")]
    RoundEnded(RoundId),

    #[error("round {round} is {status} and not accepting contributions")]
    NotAcceptingContributions { round: RoundId, status: RoundStatus },

    #[error("contribution of {amount} exceeds the {remaining} left under round {round}'s hard cap")]
    HardCapExceeded {
        round: RoundId,
        amount: Amount,
        remaining: Amount,
    },

    #[error("contribution of {amount} exceeds the {remaining} round {round}'s tokens for sale can still settle")]
    TokenCapacityExceeded {
        round: RoundId,
        amount: Amount,
        remaining: Amount,
    },

    #[error("round {0} is already prepared, its contributions are frozen")]
    AlreadyPrepared(RoundId),

    #[error("round {round} was prepared for {planned} raised but now records {raised}")]
    PlanOutOfDate {
        round: RoundId,
        planned: Amount,
        raised: Amount,
    },

    #[error("contribution {id} is {actual:?}, expected {expected:?}")]
    ContributionNotPending {
        id: ContributionId,
        expected: ContributionStatus,
        actual: ContributionStatus,
    },

    #[error("sale contract for round {round} holds {available} tokens, needs {required}")]
    InsufficientTokenBalance {
        round: RoundId,
        required: Amount,
        available: Amount,
    },

    #[error("vesting vault for round {round} holds {actual}, expected 0 or {expected}")]
    VaultMisfunded {
        round: RoundId,
        expected: Amount,
        actual: Amount,
    },

    #[error("round {0} has not been prepared")]
    NotPrepared(RoundId),

    #[error("round {round} settlement is at {current}, cannot run {requested}")]
    StepOutOfOrder {
        round: RoundId,
        requested: SettlementStep,
        current: SettlementStep,
    },

    #[error("round {0} has no liquidity position to lock")]
    NoLiquidityPosition(RoundId),

    #[error("round {round} raised {raised}, which meets the soft cap {soft_cap} and fits its token capacity")]
    SoftCapReached {
        round: RoundId,
        raised: Amount,
        soft_cap: Amount,
    },

    #[error("round {round} is {status}, refunds are not open")]
    NotRefundable { round: RoundId, status: RoundStatus },

    #[error("round {round} is {status}, claims are not open")]
    NotClaimable { round: RoundId, status: RoundStatus },

    #[error("{wallet} has no allocation in round {round}")]
    NotBeneficiary { round: RoundId, wallet: Address },

    #[error("round {0} has no fee split to distribute")]
    FeeSplitMissing(RoundId),

    #[error("unauthorized {permission} on round {round}: {reason}")]
    Unauthorized {
        round: RoundId,
        permission: Permission,
        reason: String,
    },
}

/// The round's economics rule out the requested outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EconomicError {
    #[error("round {round} raised {raised}, below the soft cap {soft_cap}")]
    SoftCapNotMet {
        round: RoundId,
        raised: Amount,
        soft_cap: Amount,
    },
}

/// A repeat of something that may only happen once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyViolation {
    #[error("{wallet} already claimed in round {round}")]
    AlreadyClaimed { round: RoundId, wallet: Address },

    #[error("claim for {wallet} in round {round} is in flight")]
    ClaimInFlight { round: RoundId, wallet: Address },

    #[error("nothing to refund for {contributor} in round {round}")]
    NothingToRefund { round: RoundId, contributor: Address },

    #[error("refund for {contributor} in round {round} is in flight")]
    RefundInFlight { round: RoundId, contributor: Address },

    #[error("round {round} committed root {committed}, refusing {submitted}")]
    RootMismatch {
        round: RoundId,
        committed: Digest,
        submitted: Digest,
    },

    #[error("referral pool for round {0} was already distributed")]
    FeeSplitProcessed(RoundId),

    #[error("referral pool for round {0} is being distributed")]
    FeeSplitInFlight(RoundId),
}

/// A collaborator outside the engine failed. Safe to retry later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalDependencyError {
    #[error("chain call {call} failed: {message}")]
    Chain { call: &'static str, message: String },

    #[error("contribution ledger: {0}")]
    Ledger(LedgerError),
}

/// Broad class of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fix the input.
    Validation,
    /// Wrong state for the request.
    Precondition,
    /// Route to the other finalization path.
    Economic,
    /// Already done. Original state preserved.
    Idempotency,
    /// Try again later.
    ExternalDependency,
    /// The chain refused the call.
    Reverted,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Precondition => "precondition",
            Self::Economic => "economic",
            Self::Idempotency => "idempotency",
            Self::ExternalDependency => "external_dependency",
            Self::Reverted => "reverted",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Every error the engine returns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("economic error: {0}")]
    Economic(#[from] EconomicError),

    #[error("idempotency violation: {0}")]
    Idempotency(#[from] IdempotencyViolation),

    #[error("external dependency error: {0}")]
    External(#[from] ExternalDependencyError),

    #[error("chain call {call} reverted: {reason}")]
    Reverted { call: &'static str, reason: String },

    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("contribution not found: {0}")]
    ContributionNotFound(ContributionId),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Economic(_) => ErrorKind::Economic,
            Self::Idempotency(_) => ErrorKind::Idempotency,
            Self::External(_) => ErrorKind::ExternalDependency,
            Self::Reverted { .. } => ErrorKind::Reverted,
            Self::RoundNotFound(_) | Self::ContributionNotFound(_) => ErrorKind::NotFound,
            Self::Store(_) | Self::Crypto(_) => ErrorKind::Internal,
        }
    }

    /// Only external failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExternalDependency
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoundNotFound(id) => Self::RoundNotFound(id),
            StoreError::ContributionNotFound(id) => Self::ContributionNotFound(id),
            StoreError::ContributionConflict {
                id,
                expected,
                actual,
            } => PreconditionError::ContributionNotPending {
                id,
                expected,
                actual,
            }
            .into(),
            StoreError::StatusConflict {
                round,
                expected,
                actual,
            } => PreconditionError::WrongStatus {
                round,
                expected,
                actual,
            }
            .into(),
            StoreError::IllegalTransition { round, from, to } => {
                PreconditionError::IllegalTransition { round, from, to }.into()
            }
            StoreError::StepConflict {
                round,
                expected,
                actual,
            } => PreconditionError::StepOutOfOrder {
                round,
                requested: expected.next().unwrap_or(expected),
                current: actual,
            }
            .into(),
            StoreError::RootConflict {
                round,
                committed,
                submitted,
            } => IdempotencyViolation::RootMismatch {
                round,
                committed,
                submitted,
            }
            .into(),
            StoreError::RefundAlreadyPaid { round, contributor }
            | StoreError::RefundNotFound { round, contributor } => {
                IdempotencyViolation::NothingToRefund { round, contributor }.into()
            }
            StoreError::RefundInFlight { round, contributor } => {
                IdempotencyViolation::RefundInFlight { round, contributor }.into()
            }
            StoreError::AlreadyClaimed { round, wallet } => {
                IdempotencyViolation::AlreadyClaimed { round, wallet }.into()
            }
            StoreError::ClaimInFlight { round, wallet } => {
                IdempotencyViolation::ClaimInFlight { round, wallet }.into()
            }
            StoreError::FeeSplitNotFound(round) => PreconditionError::FeeSplitMissing(round).into(),
            StoreError::FeeSplitProcessed(round) => {
                IdempotencyViolation::FeeSplitProcessed(round).into()
            }
            StoreError::FeeSplitInFlight(round) => {
                IdempotencyViolation::FeeSplitInFlight(round).into()
            }
            other => Self::Store(other),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RoundNotFound(id) => Self::RoundNotFound(id),
            LedgerError::Store(store) => store.into(),
            LedgerError::NoContributions(_) => ValidationError::NoContributors.into(),
            LedgerError::InvalidConfig(msg) => Self::Config(msg),
            other => ExternalDependencyError::Ledger(other).into(),
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
