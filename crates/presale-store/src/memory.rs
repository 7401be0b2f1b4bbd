use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use presale_types::{
    Address, Allocation, Amount, ClaimRecord, Contribution, ContributionId, ContributionStatus,
    ContributorTotal, Digest, FeeSplit, ProofRecord, RefundRecord, RefundStatus, Round, RoundId,
    RoundStatus, SettlementPlan, SettlementStep, TxRef,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ClaimStore, ContributionStore, ProofStore, RefundStore, RootWrite, RoundStore, SettlementStore,
};

#[derive(Clone, Debug)]
enum ClaimSlot {
    InFlight,
    Claimed(ClaimRecord),
}

#[derive(Default)]
struct State {
    rounds: HashMap<RoundId, Round>,
    contributions: HashMap<ContributionId, Contribution>,
    round_contributions: HashMap<RoundId, Vec<ContributionId>>,
    snapshots: HashMap<RoundId, Vec<ContributorTotal>>,
    allocations: HashMap<RoundId, Vec<Allocation>>,
    proofs: HashMap<RoundId, BTreeMap<Address, ProofRecord>>,
    plans: HashMap<RoundId, SettlementPlan>,
    fee_splits: HashMap<RoundId, FeeSplit>,
    fee_splits_in_flight: HashSet<RoundId>,
    refunds: BTreeMap<(RoundId, Address), RefundRecord>,
    claims: HashMap<(RoundId, Address), ClaimSlot>,
}

impl State {
    fn round_mut(&mut self, id: &RoundId) -> StoreResult<&mut Round> {
        self.rounds
            .get_mut(id)
            .ok_or(StoreError::RoundNotFound(*id))
    }
}

/// In-memory launch store.
///
/// Every table lives behind one `RwLock`, so each trait method is atomic
/// with respect to every other, including calls that touch a contribution
/// and its round together.
pub struct InMemoryLaunchStore {
    state: RwLock<State>,
}

impl InMemoryLaunchStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Number of rounds currently stored.
    pub fn round_count(&self) -> usize {
        self.state.read().expect("lock poisoned").rounds.len()
    }

    /// Number of contribution rows across all rounds.
    pub fn contribution_count(&self) -> usize {
        self.state.read().expect("lock poisoned").contributions.len()
    }
}

impl Default for InMemoryLaunchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLaunchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLaunchStore")
            .field("rounds", &self.round_count())
            .field("contributions", &self.contribution_count())
            .finish()
    }
}

impl RoundStore for InMemoryLaunchStore {
    fn insert_round(&self, round: Round) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.rounds.contains_key(&round.id) {
            return Err(StoreError::DuplicateRound(round.id));
        }
        state.rounds.insert(round.id, round);
        Ok(())
    }

    fn get_round(&self, id: &RoundId) -> StoreResult<Option<Round>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.rounds.get(id).cloned())
    }

    fn list_rounds(&self) -> StoreResult<Vec<Round>> {
        let state = self.state.read().expect("lock poisoned");
        let mut rounds: Vec<Round> = state.rounds.values().cloned().collect();
        rounds.sort_by_key(|r| r.id);
        Ok(rounds)
    }

    fn compare_and_set_status(
        &self,
        id: &RoundId,
        expected: RoundStatus,
        next: RoundStatus,
    ) -> StoreResult<Round> {
        let mut state = self.state.write().expect("lock poisoned");
        let round = state.round_mut(id)?;
        if round.status != expected {
            return Err(StoreError::StatusConflict {
                round: *id,
                expected,
                actual: round.status,
            });
        }
        if !expected.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                round: *id,
                from: expected,
                to: next,
            });
        }
        round.status = next;
        debug!(round = %id, from = %expected, to = %next, "status updated");
        Ok(round.clone())
    }

    fn advance_settlement(
        &self,
        id: &RoundId,
        expected: SettlementStep,
        next: SettlementStep,
    ) -> StoreResult<Round> {
        let mut state = self.state.write().expect("lock poisoned");
        let round = state.round_mut(id)?;
        if round.settlement != expected {
            return Err(StoreError::StepConflict {
                round: *id,
                expected,
                actual: round.settlement,
            });
        }
        round.settlement = next;
        Ok(round.clone())
    }

    fn set_merkle_root(&self, id: &RoundId, root: Digest) -> StoreResult<RootWrite> {
        let mut state = self.state.write().expect("lock poisoned");
        let round = state.round_mut(id)?;
        match round.merkle_root {
            None => {
                round.merkle_root = Some(root);
                Ok(RootWrite::Written)
            }
            Some(committed) if committed == root => Ok(RootWrite::Unchanged),
            Some(committed) => Err(StoreError::RootConflict {
                round: *id,
                committed,
                submitted: root,
            }),
        }
    }
}

impl ContributionStore for InMemoryLaunchStore {
    fn insert_contribution(&self, contribution: Contribution) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if !state.rounds.contains_key(&contribution.round) {
            return Err(StoreError::RoundNotFound(contribution.round));
        }
        state
            .round_contributions
            .entry(contribution.round)
            .or_default()
            .push(contribution.id);
        state.contributions.insert(contribution.id, contribution);
        Ok(())
    }

    fn get_contribution(&self, id: &ContributionId) -> StoreResult<Option<Contribution>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.contributions.get(id).cloned())
    }

    fn contributions_for_round(&self, round: &RoundId) -> StoreResult<Vec<Contribution>> {
        let state = self.state.read().expect("lock poisoned");
        let ids = state.round_contributions.get(round).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.contributions.get(id).cloned())
            .collect())
    }

    fn confirm_contribution(&self, id: &ContributionId) -> StoreResult<Amount> {
        let mut state = self.state.write().expect("lock poisoned");
        let contribution = state
            .contributions
            .get(id)
            .cloned()
            .ok_or(StoreError::ContributionNotFound(*id))?;
        if contribution.status != ContributionStatus::Pending {
            return Err(StoreError::ContributionConflict {
                id: *id,
                expected: ContributionStatus::Pending,
                actual: contribution.status,
            });
        }

        let round = state.round_mut(&contribution.round)?;
        let total = round
            .total_raised
            .checked_add(contribution.amount)
            .ok_or(StoreError::Overflow("total raised"))?;
        round.total_raised = total;

        if let Some(row) = state.contributions.get_mut(id) {
            row.status = ContributionStatus::Confirmed;
        }
        Ok(total)
    }

    fn contribution_snapshot(&self, round: &RoundId) -> StoreResult<Option<Vec<ContributorTotal>>> {
        let state = self.state.read().expect("lock poisoned");
        let mut totals: BTreeMap<Address, Amount> = BTreeMap::new();
        for id in state.round_contributions.get(round).into_iter().flatten() {
            let Some(c) = state.contributions.get(id) else {
                continue;
            };
            if c.is_confirmed() {
                let entry = totals.entry(c.contributor).or_default();
                *entry = entry
                    .checked_add(c.amount)
                    .ok_or(StoreError::Overflow("contributor total"))?;
            }
        }
        if !totals.is_empty() {
            return Ok(Some(
                totals
                    .into_iter()
                    .map(|(address, amount)| ContributorTotal::new(address, amount))
                    .collect(),
            ));
        }
        Ok(state.snapshots.get(round).cloned())
    }

    fn write_snapshot(&self, round: &RoundId, mut totals: Vec<ContributorTotal>) -> StoreResult<Amount> {
        let mut state = self.state.write().expect("lock poisoned");
        let sum = totals.iter().try_fold(0u128, |acc, t| {
            acc.checked_add(t.amount).ok_or(StoreError::Overflow("snapshot total"))
        })?;
        state.round_mut(round)?.total_raised = sum;
        totals.sort_by_key(|t| t.address);
        state.snapshots.insert(*round, totals);
        debug!(round = %round, total_raised = sum, "snapshot written back");
        Ok(sum)
    }
}

impl ProofStore for InMemoryLaunchStore {
    fn put_allocations(&self, round: &RoundId, allocations: Vec<Allocation>) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.allocations.insert(*round, allocations);
        Ok(())
    }

    fn allocations(&self, round: &RoundId) -> StoreResult<Vec<Allocation>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.allocations.get(round).cloned().unwrap_or_default())
    }

    fn upsert_proofs(&self, round: &RoundId, proofs: Vec<ProofRecord>) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let table = state.proofs.entry(*round).or_default();
        let count = proofs.len();
        for proof in proofs {
            table.insert(proof.wallet, proof);
        }
        Ok(count)
    }

    fn proof(&self, round: &RoundId, wallet: &Address) -> StoreResult<Option<ProofRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .proofs
            .get(round)
            .and_then(|table| table.get(wallet))
            .cloned())
    }

    fn proofs_for_round(&self, round: &RoundId) -> StoreResult<Vec<ProofRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .proofs
            .get(round)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl SettlementStore for InMemoryLaunchStore {
    fn put_plan(&self, plan: SettlementPlan) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.plans.insert(plan.round, plan);
        Ok(())
    }

    fn plan(&self, round: &RoundId) -> StoreResult<Option<SettlementPlan>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.plans.get(round).cloned())
    }

    fn record_fee_split(&self, split: FeeSplit) -> StoreResult<FeeSplit> {
        let mut state = self.state.write().expect("lock poisoned");
        Ok(state
            .fee_splits
            .entry(split.round)
            .or_insert(split)
            .clone())
    }

    fn fee_split(&self, round: &RoundId) -> StoreResult<Option<FeeSplit>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.fee_splits.get(round).cloned())
    }

    fn reserve_fee_split(&self, round: &RoundId) -> StoreResult<FeeSplit> {
        let mut state = self.state.write().expect("lock poisoned");
        let split = state
            .fee_splits
            .get(round)
            .cloned()
            .ok_or(StoreError::FeeSplitNotFound(*round))?;
        if split.processed {
            return Err(StoreError::FeeSplitProcessed(*round));
        }
        if !state.fee_splits_in_flight.insert(*round) {
            return Err(StoreError::FeeSplitInFlight(*round));
        }
        Ok(split)
    }

    fn mark_fee_split_processed(&self, round: &RoundId) -> StoreResult<FeeSplit> {
        let mut state = self.state.write().expect("lock poisoned");
        let split = state
            .fee_splits
            .get_mut(round)
            .ok_or(StoreError::FeeSplitNotFound(*round))?;
        if split.processed {
            return Err(StoreError::FeeSplitProcessed(*round));
        }
        split.processed = true;
        let split = split.clone();
        state.fee_splits_in_flight.remove(round);
        Ok(split)
    }

    fn release_fee_split(&self, round: &RoundId) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.fee_splits_in_flight.remove(round);
        Ok(())
    }
}

impl RefundStore for InMemoryLaunchStore {
    fn open_refunds(&self, records: Vec<RefundRecord>) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let mut created = 0;
        for record in records {
            let key = (record.round, record.contributor);
            if !state.refunds.contains_key(&key) {
                state.refunds.insert(key, record);
                created += 1;
            }
        }
        Ok(created)
    }

    fn refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<Option<RefundRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.refunds.get(&(*round, *contributor)).cloned())
    }

    fn refunds_for_round(&self, round: &RoundId) -> StoreResult<Vec<RefundRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .refunds
            .values()
            .filter(|r| r.round == *round)
            .cloned()
            .collect())
    }

    fn reserve_refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<RefundRecord> {
        let mut state = self.state.write().expect("lock poisoned");
        let record = state
            .refunds
            .get_mut(&(*round, *contributor))
            .ok_or(StoreError::RefundNotFound {
                round: *round,
                contributor: *contributor,
            })?;
        match record.status {
            RefundStatus::Pending => {
                record.status = RefundStatus::InFlight;
                Ok(record.clone())
            }
            RefundStatus::InFlight => Err(StoreError::RefundInFlight {
                round: *round,
                contributor: *contributor,
            }),
            RefundStatus::Paid { .. } => Err(StoreError::RefundAlreadyPaid {
                round: *round,
                contributor: *contributor,
            }),
        }
    }

    fn complete_refund(
        &self,
        round: &RoundId,
        contributor: &Address,
        tx: TxRef,
    ) -> StoreResult<RefundRecord> {
        let mut state = self.state.write().expect("lock poisoned");
        let record = state
            .refunds
            .get_mut(&(*round, *contributor))
            .ok_or(StoreError::RefundNotFound {
                round: *round,
                contributor: *contributor,
            })?;
        match record.status {
            RefundStatus::InFlight => {}
            RefundStatus::Pending => {
                return Err(StoreError::RefundNotReserved {
                    round: *round,
                    contributor: *contributor,
                })
            }
            RefundStatus::Paid { .. } => {
                return Err(StoreError::RefundAlreadyPaid {
                    round: *round,
                    contributor: *contributor,
                })
            }
        }
        record.paid = record.amount;
        record.amount = 0;
        record.status = RefundStatus::Paid { tx };
        let completed = record.clone();

        let ids = state.round_contributions.get(round).cloned().unwrap_or_default();
        for id in ids {
            if let Some(c) = state.contributions.get_mut(&id) {
                if c.contributor == *contributor && c.status == ContributionStatus::Confirmed {
                    c.status = ContributionStatus::Refunded;
                }
            }
        }
        Ok(completed)
    }

    fn release_refund(&self, round: &RoundId, contributor: &Address) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(record) = state.refunds.get_mut(&(*round, *contributor)) {
            if record.status == RefundStatus::InFlight {
                record.status = RefundStatus::Pending;
            }
        }
        Ok(())
    }
}

impl ClaimStore for InMemoryLaunchStore {
    fn reserve_claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        match state.claims.get(&(*round, *wallet)) {
            Some(ClaimSlot::Claimed(_)) => Err(StoreError::AlreadyClaimed {
                round: *round,
                wallet: *wallet,
            }),
            Some(ClaimSlot::InFlight) => Err(StoreError::ClaimInFlight {
                round: *round,
                wallet: *wallet,
            }),
            None => {
                state.claims.insert((*round, *wallet), ClaimSlot::InFlight);
                Ok(())
            }
        }
    }

    fn complete_claim(&self, record: ClaimRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let key = (record.round, record.wallet);
        if matches!(state.claims.get(&key), Some(ClaimSlot::Claimed(_))) {
            return Err(StoreError::AlreadyClaimed {
                round: record.round,
                wallet: record.wallet,
            });
        }
        state.claims.insert(key, ClaimSlot::Claimed(record));
        Ok(())
    }

    fn release_claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let key = (*round, *wallet);
        if matches!(state.claims.get(&key), Some(ClaimSlot::InFlight)) {
            state.claims.remove(&key);
        }
        Ok(())
    }

    fn claim(&self, round: &RoundId, wallet: &Address) -> StoreResult<Option<ClaimRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(match state.claims.get(&(*round, *wallet)) {
            Some(ClaimSlot::Claimed(record)) => Some(record.clone()),
            _ => None,
        })
    }
}
