use presale_types::{
    Address, Allocation, Amount, ClaimRecord, Contribution, ContributionId, ContributorTotal,
    Digest, FeeSplit, ProofRecord, RefundRecord, Round, RoundId, RoundStatus, SettlementPlan,
    SettlementStep, TxRef,
};

use crate::error::StoreResult;

/// Outcome of a write-once root commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootWrite {
    /// The root was empty and is now set.
    Written,
    /// The same root was already committed. Nothing changed.
    Unchanged,
}

/// Round metadata.
///
/// Every mutation is conditional on the state the caller last observed, so
/// two concurrent transitions on the same round can never both apply.
pub trait RoundStore: Send + Sync {
    /// Persist a newly submitted round. Fails if the id is taken.
    fn insert_round(&self, round: Round) -> StoreResult<()>;

    /// Returns `Ok(None)` if the round does not exist.
    fn get_round(&self, id: &RoundId) -> StoreResult<Option<Round>>;

    fn list_rounds(&self) -> StoreResult<Vec<Round>>;

    /// Move the round from `expected` to `next` and return the updated round.
    /// Fails unless `next` is a legal successor of `expected`.
    fn compare_and_set_status(
        &self,
        id: &RoundId,
        expected: RoundStatus,
        next: RoundStatus,
    ) -> StoreResult<Round>;

    /// Record that `next` completed, provided the round is still at
    /// `expected`.
    fn advance_settlement(
        &self,
        id: &RoundId,
        expected: SettlementStep,
        next: SettlementStep,
    ) -> StoreResult<Round>;

    /// Commit the Merkle root. A different root after one is committed is a
    /// conflict.
    fn set_merkle_root(&self, id: &RoundId, root: Digest) -> StoreResult<RootWrite>;
}

/// Contribution records and the per-round snapshot derived from them.
pub trait ContributionStore: Send + Sync {
    fn insert_contribution(&self, contribution: Contribution) -> StoreResult<()>;

    fn get_contribution(&self, id: &ContributionId) -> StoreResult<Option<Contribution>>;

    fn contributions_for_round(&self, round: &RoundId) -> StoreResult<Vec<Contribution>>;

    /// Mark a pending contribution confirmed and add its amount to the round's
    /// total raised in the same atomic step. Returns the round's new total.
    fn confirm_contribution(&self, id: &ContributionId) -> StoreResult<Amount>;

    /// Confirmed per-contributor totals, ordered by address.
    ///
    /// Returns `Ok(None)` when the round has neither confirmed contributions
    /// nor a written-back snapshot.
    fn contribution_snapshot(&self, round: &RoundId) -> StoreResult<Option<Vec<ContributorTotal>>>;

    /// Persist a snapshot recovered from the event log and make its sum the
    /// round's authoritative total raised.
    fn write_snapshot(&self, round: &RoundId, totals: Vec<ContributorTotal>) -> StoreResult<Amount>;
}

/// Allocations and the proofs derived from them.
pub trait ProofStore: Send + Sync {
    /// Replace the round's allocation rows.
    fn put_allocations(&self, round: &RoundId, allocations: Vec<Allocation>) -> StoreResult<()>;

    fn allocations(&self, round: &RoundId) -> StoreResult<Vec<Allocation>>;

    /// Insert or overwrite proofs keyed by (round, wallet). Idempotent.
    fn upsert_proofs(&self, round: &RoundId, proofs: Vec<ProofRecord>) -> StoreResult<usize>;

    fn proof(&self, round: &RoundId, wallet: &Address) -> StoreResult<Option<ProofRecord>>;

    fn proofs_for_round(&self, round: &RoundId) -> StoreResult<Vec<ProofRecord>>;
}

/// Settlement plan and fee split records.
pub trait SettlementStore: Send + Sync {
    fn put_plan(&self, plan: SettlementPlan) -> StoreResult<()>;

    fn plan(&self, round: &RoundId) -> StoreResult<Option<SettlementPlan>>;

    /// Insert the fee split unless one exists. Returns the stored split,
    /// which is the earlier one on a repeat call.
    fn record_fee_split(&self, split: FeeSplit) -> StoreResult<FeeSplit>;

    fn fee_split(&self, round: &RoundId) -> StoreResult<Option<FeeSplit>>;

    /// Take the referral payout for this round. Held until it is marked
    /// processed or released, and a second reservation is refused either way.
    fn reserve_fee_split(&self, round: &RoundId) -> StoreResult<FeeSplit>;

    /// Flip `processed` from false to true and drop any reservation.
    fn mark_fee_split_processed(&self, round: &RoundId) -> StoreResult<FeeSplit>;

    /// Give back a reservation after the payout failed. No-op otherwise.
    fn release_fee_split(&self, round: &RoundId) -> StoreResult<()>;
}

/// Refund records for failed and cancelled rounds.
///
/// Payout goes `reserve_refund` -> pay -> `complete_refund`; a failed payout
/// calls `release_refund` so the wallet can retry.
pub trait RefundStore: Send + Sync {
    /// Create records that do not exist yet. Returns how many were created.
    fn open_refunds(&self, records: Vec<RefundRecord>) -> StoreResult<usize>;

    fn refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<Option<RefundRecord>>;

    fn refunds_for_round(&self, round: &RoundId) -> StoreResult<Vec<RefundRecord>>;

    /// Move a pending refund to in-flight and return it.
    fn reserve_refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<RefundRecord>;

    /// Mark an in-flight refund paid, zero its outstanding amount, and flag the
    /// contributor's contributions as refunded.
    fn complete_refund(
        &self,
        round: &RoundId,
        contributor: &Address,
        tx: TxRef,
    ) -> StoreResult<RefundRecord>;

    fn release_refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<()>;
}

/// Allocation claims after a successful round.
pub trait ClaimStore: Send + Sync {
    /// Mark the wallet's claim in flight. Fails if already claimed or reserved.
    fn reserve_claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<()>;

    fn complete_claim(&self, record: ClaimRecord) -> StoreResult<()>;

    fn release_claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<()>;

    fn claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<Option<ClaimRecord>>;
}

/// Everything the engine needs from persistence.
pub trait LaunchStore:
    RoundStore + ContributionStore + ProofStore + SettlementStore + RefundStore + ClaimStore
{
}

impl<T> LaunchStore for T where
    T: RoundStore + ContributionStore + ProofStore + SettlementStore + RefundStore + ClaimStore
{
}
