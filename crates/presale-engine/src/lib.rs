//! Finalization engine for presale and fairlaunch rounds.
//!
//! Drives a round from submission to settled outcome. An ended round is
//! prepared (contributions read, allocations computed, Merkle root
//! committed, proofs persisted) and then finalized on whichever path its
//! raise allows:
//!
//! - **success**: vault root set and funded, sale finalized, then four
//!   strictly ordered settlement steps (fee, liquidity, lock, release),
//!   each safe to re-run. Beneficiaries claim their allocation once.
//! - **failure / cancellation**: one refund record per confirmed
//!   contributor, each paid exactly once.
//!
//! Admin transitions take an [`Authorization`] built from a signed
//! operator grant. Chain access goes through the [`Chain`] traits;
//! [`SimulatedChain`] is an in-process implementation for tests and the
//! CLI.

pub mod authority;
pub mod chain;
pub mod claim;
pub mod config;
pub mod engine;
pub mod error;
pub mod machine;
pub mod prepare;
pub mod referral;
pub mod refund;
pub mod settlement;
pub mod simulated;

pub use authority::{Authorization, TrustedIssuers};
pub use chain::{
    Chain, ChainError, ChainReader, ChainWriter, FeeConfig, FundsRelease, LiquidityOrder,
    LpPosition, SaleOutcome, SaleState,
};
pub use claim::ClaimReceipt;
pub use config::EngineConfig;
pub use engine::LaunchEngine;
pub use error::{
    EconomicError, EngineError, EngineResult, ErrorKind, ExternalDependencyError,
    IdempotencyViolation, PreconditionError,
};
pub use machine::{FailureReceipt, FinalizeOutcome, SuccessReceipt, VaultFunding};
pub use prepare::{PreparedRound, ProofLookup};
pub use referral::{ReferralPayout, ReferralReceipt};
pub use refund::RefundReceipt;
pub use settlement::{SettlementRun, StepOutcome, StepReceipt};
pub use simulated::SimulatedChain;

#[cfg(test)]
mod scenarios;
