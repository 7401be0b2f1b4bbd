use presale_alloc::{AllocationCalculator, AllocationInputs, AllocationPlan};
use presale_crypto::{AllocationTree, LeafBinding};
use presale_ledger::{ContributionEventSource, ContributionLedger};
use presale_store::{LaunchStore, RootWrite};
use presale_types::{
    Address, Allocation, Amount, ContributorTotal, Digest, Permission, ProofRecord, Round,
    RoundId, RoundStatus, SettlementPlan,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::authority::Authorization;
use crate::chain::Chain;
use crate::engine::LaunchEngine;
use crate::error::{
    EconomicError, EngineError, EngineResult, IdempotencyViolation, PreconditionError,
};

/// Everything finalization needs, computed and committed by
/// [`LaunchEngine::prepare`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PreparedRound {
    pub round: RoundId,
    pub root: Digest,
    /// `false` when the same root was already committed by an earlier run.
    pub newly_committed: bool,
    #[serde(with = "presale_types::amount")]
    pub total_allocation: Amount,
    pub settlement: SettlementPlan,
    pub proofs: Vec<ProofRecord>,
    pub zero_token_contributors: Vec<Address>,
    /// Leaves in the tree, padding included.
    pub leaf_count: usize,
    pub padded: bool,
}

/// A wallet's allocation and the path proving it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProofLookup {
    pub wallet: Address,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
    pub siblings: Vec<Digest>,
    pub root: Digest,
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Compute allocations for an ended round, commit the Merkle root, and
    /// persist the settlement plan and every wallet's proof.
    ///
    /// Safe to repeat: the same inputs produce the same root, which the
    /// store accepts as a no-op. Any validation failure aborts before the
    /// root or a single proof is written.
    pub fn prepare(&self, id: &RoundId, auth: &Authorization) -> EngineResult<PreparedRound> {
        self.authorize(auth, Permission::Prepare, id)?;
        let round = self.round(id)?;
        self.require_status(&round, RoundStatus::Ended)?;

        let ledger = ContributionLedger::new(&self.store, &self.chain, self.config.scan.clone());
        let snapshot = ledger.snapshot(id)?.require_complete()?;
        if snapshot.total_raised < round.terms.soft_cap {
            return Err(EconomicError::SoftCapNotMet {
                round: *id,
                raised: snapshot.total_raised,
                soft_cap: round.terms.soft_cap,
            }
            .into());
        }

        let plan = self.compute_plan(&round, snapshot.totals)?;
        let tree = AllocationTree::build(binding_for(&round), &plan.allocations)?;
        let root = tree.root();

        let newly_committed = match self.store.set_merkle_root(id, root)? {
            RootWrite::Written => true,
            RootWrite::Unchanged => {
                debug!(round = %id, root = %root, "root already committed");
                false
            }
        };
        self.store.put_allocations(id, plan.allocations.clone())?;
        self.store.put_plan(plan.settlement.clone())?;
        let proofs = proof_records(id, &tree);
        self.store.upsert_proofs(id, proofs.clone())?;

        info!(
            round = %id,
            root = %root,
            beneficiaries = tree.beneficiary_count(),
            total_allocation = plan.total_allocation(),
            unsold_to_burn = plan.settlement.unsold_to_burn,
            "round prepared"
        );

        Ok(PreparedRound {
            round: *id,
            root,
            newly_committed,
            total_allocation: plan.total_allocation(),
            settlement: plan.settlement,
            proofs,
            zero_token_contributors: plan.zero_token_contributors,
            leaf_count: tree.leaf_count(),
            padded: tree.is_padded(),
        })
    }

    /// Look up a wallet's proof. `Ok(None)` when the wallet has no
    /// allocation or the round is not prepared.
    pub fn proof(&self, id: &RoundId, wallet: &Address) -> EngineResult<Option<ProofLookup>> {
        let round = self.round(id)?;
        let Some(root) = round.merkle_root else {
            return Ok(None);
        };
        Ok(self.store.proof(id, wallet)?.map(|record| ProofLookup {
            wallet: record.wallet,
            amount: record.amount,
            siblings: record.siblings,
            root,
        }))
    }

    /// Rebuild every proof from the persisted allocations.
    ///
    /// Proofs are derived data. The rebuilt root must equal the committed
    /// one; anything else means the allocations changed underneath the
    /// commitment and nothing is overwritten.
    pub fn rebuild_proofs(&self, id: &RoundId, auth: &Authorization) -> EngineResult<usize> {
        self.authorize(auth, Permission::Prepare, id)?;
        let round = self.round(id)?;
        let committed = round
            .merkle_root
            .ok_or(PreconditionError::NotPrepared(*id))?;
        let allocations: Vec<Allocation> = self.store.allocations(id)?;
        if allocations.is_empty() {
            return Err(PreconditionError::NotPrepared(*id).into());
        }

        let tree = AllocationTree::build(binding_for(&round), &allocations)?;
        if tree.root() != committed {
            return Err(IdempotencyViolation::RootMismatch {
                round: *id,
                committed,
                submitted: tree.root(),
            }
            .into());
        }
        let written = self.store.upsert_proofs(id, proof_records(id, &tree))?;
        info!(round = %id, proofs = written, "proofs rebuilt");
        Ok(written)
    }

    /// Run the calculator with chain-side fee and decimals.
    fn compute_plan(
        &self,
        round: &Round,
        totals: Vec<ContributorTotal>,
    ) -> EngineResult<AllocationPlan> {
        let terms = &round.terms;
        let fee = self
            .chain
            .fee_config(terms.chain_id)
            .map_err(|e| e.during("fee_config"))?;
        fee.validate()
            .map_err(|msg| EngineError::Config(format!("chain fee configuration: {msg}")))?;
        if fee.fee_bps != terms.fee_bps {
            warn!(
                round = %round.id,
                submitted = terms.fee_bps,
                chain = fee.fee_bps,
                "submitted fee bps ignored in favour of chain configuration"
            );
        }

        let decimals = self
            .chain
            .token_decimals(&terms.token)
            .map_err(|e| e.during("token_decimals"))?;
        if decimals != terms.token_decimals {
            warn!(
                round = %round.id,
                submitted = terms.token_decimals,
                chain = decimals,
                "token decimals differ from submission, using chain value"
            );
        }

        let mut inputs = AllocationInputs::from_round(round, totals, fee.fee_bps)
            .with_slippage_bps(self.config.slippage_bps)
            .with_legacy_team_inference(self.config.infer_legacy_team_format);
        inputs.token_decimals = decimals;
        Ok(AllocationCalculator::new(inputs).calculate()?)
    }
}

fn binding_for(round: &Round) -> LeafBinding {
    let terms = &round.terms;
    LeafBinding::new(terms.vesting_vault, terms.chain_id, terms.schedule_salt)
}

fn proof_records(id: &RoundId, tree: &AllocationTree) -> Vec<ProofRecord> {
    tree.proofs()
        .map(|(wallet, amount, siblings)| ProofRecord {
            round: *id,
            wallet,
            amount,
            siblings,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use presale_alloc::ValidationError;
    use presale_crypto::{verify_proof, AllocationLeaf};
    use presale_store::ProofStore;
    use presale_types::{TeamAllocation, TeamAllocationFormat, TeamWalletShare};

    use super::*;
    use crate::chain::FeeConfig;
    use crate::engine::testkit::*;

    fn two_contributors() -> Harness {
        let h = Harness::new(terms());
        h.run_sale(&[(addr(1), 6 * ETH / 10), (addr(2), 5 * ETH / 10)]);
        h
    }

    #[test]
    fn two_leaf_tree_with_verifying_proofs() {
        let h = two_contributors();
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();

        assert_eq!(prepared.leaf_count, 2);
        assert!(!prepared.padded);
        assert!(prepared.newly_committed);
        assert_eq!(prepared.total_allocation, 11_000 * ETH);
        assert_eq!(prepared.settlement.total_raised, 11 * ETH / 10);
        assert_eq!(
            h.engine.round(&h.round).unwrap().merkle_root,
            Some(prepared.root)
        );

        let binding = LeafBinding::new(VAULT, terms().chain_id, terms().schedule_salt);
        for (wallet, amount) in [(addr(1), 6_000 * ETH), (addr(2), 5_000 * ETH)] {
            let found = h.engine.proof(&h.round, &wallet).unwrap().unwrap();
            assert_eq!(found.amount, amount);
            let leaf = AllocationLeaf::new(wallet, amount).hash(&binding);
            assert!(verify_proof(&prepared.root, &found.siblings, &leaf));

            let tampered = AllocationLeaf::new(wallet, amount + 1).hash(&binding);
            assert!(!verify_proof(&prepared.root, &found.siblings, &tampered));
        }
        assert_eq!(h.engine.proof(&h.round, &addr(3)).unwrap(), None);
    }

    #[test]
    fn allocations_sum_to_vesting_total() {
        let h = two_contributors();
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
        let sum: Amount = h
            .engine
            .store()
            .allocations(&h.round)
            .unwrap()
            .iter()
            .map(|a| a.total)
            .sum();
        assert_eq!(sum, prepared.settlement.total_vesting_allocation);
        let s = &prepared.settlement;
        assert!(s.unsold_to_burn + s.tokens_for_lp + s.tokens_sold <= terms().tokens_for_sale);
    }

    #[test]
    fn repeat_prepare_keeps_root() {
        let h = two_contributors();
        let first = h.engine.prepare(&h.round, &h.admin()).unwrap();
        let second = h.engine.prepare(&h.round, &h.admin()).unwrap();
        assert_eq!(first.root, second.root);
        assert!(!second.newly_committed);
    }

    #[test]
    fn single_beneficiary_is_padded() {
        let h = Harness::new(terms());
        h.run_sale(&[(addr(1), 12 * ETH / 10)]);
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
        assert!(prepared.padded);
        assert_eq!(prepared.leaf_count, 2);
        assert_eq!(prepared.proofs.len(), 1);
    }

    #[test]
    fn chain_fee_overrides_submitted_fee() {
        let h = two_contributors();
        h.engine.chain().set_fee_config(FeeConfig {
            fee_bps: 300,
            referral_share_bps: 2_500,
            staking_share_bps: 2_500,
        });
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
        assert_eq!(prepared.settlement.fee_bps, 300);
        assert_eq!(prepared.settlement.fee_amount, 33 * ETH / 1_000);
    }

    #[test]
    fn team_wallets_merge_with_investors() {
        let t = with_team(
            terms(),
            TeamAllocation::new(1, TeamAllocationFormat::Percent),
            vec![TeamWalletShare::new(addr(1), 60), TeamWalletShare::new(addr(9), 40)],
        );
        let h = Harness::new(t);
        h.run_sale(&[(addr(1), 6 * ETH / 10), (addr(2), 5 * ETH / 10)]);
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();

        assert_eq!(prepared.proofs.len(), 3);
        let team = 10_000 * ETH;
        assert_eq!(prepared.settlement.team_tokens, team);
        assert_eq!(
            h.engine.proof(&h.round, &addr(1)).unwrap().unwrap().amount,
            6_000 * ETH + team * 60 / 100
        );
        assert_eq!(
            h.engine.proof(&h.round, &addr(9)).unwrap().unwrap().amount,
            team * 40 / 100
        );
    }

    #[test]
    fn undeclared_team_format_fails_closed() {
        let mut t = with_team(
            terms(),
            TeamAllocation::legacy(75),
            vec![TeamWalletShare::new(addr(9), 100)],
        );
        t.total_supply = None;
        let h = Harness::new(t);
        h.run_sale(&[(addr(1), 6 * ETH / 10), (addr(2), 5 * ETH / 10)]);

        let err = h.engine.prepare(&h.round, &h.admin()).unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation(ValidationError::MissingTeamFormat { value: 75 })
        );
        assert_eq!(h.engine.round(&h.round).unwrap().merkle_root, None);
        assert!(h.engine.store().proofs_for_round(&h.round).unwrap().is_empty());
    }

    #[test]
    fn under_soft_cap_cannot_prepare() {
        let h = Harness::new(terms());
        h.run_sale(&[(addr(1), 3 * ETH / 10)]);
        assert!(matches!(
            h.engine.prepare(&h.round, &h.admin()),
            Err(EngineError::Economic(EconomicError::SoftCapNotMet { .. }))
        ));
    }

    #[test]
    fn prepare_needs_ended_round() {
        let h = Harness::new(terms());
        h.engine.advance_clock(&h.round, start()).unwrap();
        assert!(matches!(
            h.engine.prepare(&h.round, &h.admin()),
            Err(EngineError::Precondition(PreconditionError::WrongStatus { .. }))
        ));
    }

    #[test]
    fn rebuild_restores_lost_proofs() {
        let h = two_contributors();
        let prepared = h.engine.prepare(&h.round, &h.admin()).unwrap();
        assert_eq!(h.engine.rebuild_proofs(&h.round, &h.admin()).unwrap(), 2);
        assert_eq!(
            h.engine.store().proofs_for_round(&h.round).unwrap(),
            prepared.proofs
        );
    }

    #[test]
    fn rebuild_refuses_changed_allocations() {
        let h = two_contributors();
        h.engine.prepare(&h.round, &h.admin()).unwrap();
        let mut allocations = h.engine.store().allocations(&h.round).unwrap();
        allocations[0].total += 1;
        h.engine.store().put_allocations(&h.round, allocations).unwrap();

        assert!(matches!(
            h.engine.rebuild_proofs(&h.round, &h.admin()),
            Err(EngineError::Idempotency(IdempotencyViolation::RootMismatch { .. }))
        ));
    }
}
