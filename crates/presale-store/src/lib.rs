//! Persistence for the presale engine.
//!
//! The engine never talks to a database directly. It reads and writes round
//! metadata, contribution snapshots, proofs, and refund/claim records through
//! the traits in this crate, and relies on the backend for atomicity of each
//! individual call.
//!
//! # Storage Backends
//!
//! - [`InMemoryLaunchStore`] -- single-lock store for tests, the CLI, and embedding
//!
//! # Design Rules
//!
//! 1. Status and settlement-step changes are compare-and-set. A caller that
//!    lost a race gets a conflict error and nothing is written.
//! 2. The Merkle root is write-once. Re-writing the same root is a no-op.
//! 3. Refunds and claims are reserved before payout and completed after, so
//!    a wallet can never be paid twice.
//! 4. Confirming a contribution and bumping the round's total raised happen
//!    in one call.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLaunchStore;
pub use traits::{
    ClaimStore, ContributionStore, LaunchStore, ProofStore, RefundStore, RootWrite, RoundStore,
    SettlementStore,
};
