//! Foundation types for the presale finalization engine.
//!
//! Every other `presale-*` crate depends on this one. It carries the data
//! model of a fundraising round from submission to settlement: the round
//! itself, recorded contributions, team wallet shares, per-beneficiary
//! allocations, persisted proofs, fee splits, and refund/claim records.
//!
//! # Key Types
//!
//! - [`Address`] -- 20-byte account address, hex encoded with a `0x` prefix
//! - [`Digest`] -- 32-byte hash used for Merkle leaves, nodes, and roots
//! - [`Round`] -- round terms plus the mutable lifecycle fields
//! - [`RoundStatus`] -- lifecycle status guarded by the state machine
//! - [`SettlementStep`] -- strictly forward post-success settlement counter
//! - [`Capability`] -- operator authority passed into admin transitions

pub mod address;
pub mod allocation;
pub mod amount;
pub mod authority;
pub mod contribution;
pub mod digest;
pub mod error;
pub mod round;
pub mod settlement;

pub use address::Address;
pub use allocation::{Allocation, ProofRecord, TeamAllocation, TeamAllocationFormat, TeamWalletShare};
pub use amount::{Amount, BPS_DENOMINATOR};
pub use authority::{Capability, CapabilityScope, Permission};
pub use contribution::{
    ClaimRecord, Contribution, ContributionId, ContributionStatus, ContributorTotal, RefundRecord,
    RefundStatus,
};
pub use digest::{Digest, ScheduleSalt};
pub use error::TypeError;
pub use round::{ChainId, RaiseAsset, Round, RoundId, RoundStatus, RoundTerms};
pub use settlement::{FeeSplit, SettlementPlan, SettlementStep, TxRef};
