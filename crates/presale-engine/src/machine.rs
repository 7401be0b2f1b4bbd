use chrono::{DateTime, Utc};
use presale_alloc::{max_raise, ValidationError};
use presale_ledger::{ContributionEventSource, ContributionLedger, LedgerSnapshot};
use presale_store::LaunchStore;
use presale_types::{
    Address, Amount, Contribution, ContributionId, Digest, Permission, Round, RoundId,
    RoundStatus, TxRef,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::authority::Authorization;
use crate::chain::{Chain, SaleOutcome};
use crate::engine::LaunchEngine;
use crate::error::{
    EconomicError, EngineError, EngineResult, IdempotencyViolation, PreconditionError,
};

/// How the vesting vault came to hold the allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tx")]
pub enum VaultFunding {
    Funded(TxRef),
    /// The vault already held exactly the allocation. Nothing was moved.
    AlreadyFunded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuccessReceipt {
    pub round: RoundId,
    pub root: Digest,
    /// `None` when the vault already carried this root.
    pub root_tx: Option<TxRef>,
    pub funding: VaultFunding,
    /// `None` when the sale contract was already finalized.
    pub finalize_tx: Option<TxRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureReceipt {
    pub round: RoundId,
    pub status: RoundStatus,
    pub finalize_tx: Option<TxRef>,
    pub refunds_opened: usize,
}

/// Result of [`LaunchEngine::finalize`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FinalizeOutcome {
    Success(SuccessReceipt),
    Failed(FailureReceipt),
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Move the round along its schedule: `Upcoming -> Live` at `start_at`,
    /// `Live -> Ended` at `end_at`. Time driven, so no authority is needed.
    pub fn advance_clock(&self, id: &RoundId, now: DateTime<Utc>) -> EngineResult<RoundStatus> {
        let mut round = self.round(id)?;
        if round.status == RoundStatus::Upcoming && round.has_started(now) {
            round = self
                .store
                .compare_and_set_status(id, RoundStatus::Upcoming, RoundStatus::Live)?;
            info!(round = %id, "round is live");
        }
        if round.status == RoundStatus::Live && round.has_ended(now) {
            round = self
                .store
                .compare_and_set_status(id, RoundStatus::Live, RoundStatus::Ended)?;
            info!(round = %id, total_raised = round.total_raised, "round ended");
        }
        Ok(round.status)
    }

    /// Record a pending contribution while the round is live.
    pub fn contribute(
        &self,
        id: &RoundId,
        contributor: Address,
        amount: Amount,
        referrer: Option<Address>,
        now: DateTime<Utc>,
    ) -> EngineResult<Contribution> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount {
                field: "contribution",
            }
            .into());
        }
        if contributor.is_zero() {
            return Err(ValidationError::ZeroAddress {
                field: "contributor",
            }
            .into());
        }

        let round = self.round(id)?;
        if round.status != RoundStatus::Live || !round.has_started(now) || round.has_ended(now) {
            return Err(PreconditionError::NotAcceptingContributions {
                round: *id,
                status: round.status,
            }
            .into());
        }
        check_raise_limit(&round, amount)?;

        let mut contribution = Contribution::new(*id, contributor, amount, now);
        if let Some(referrer) = referrer.filter(|r| *r != contributor && !r.is_zero()) {
            contribution = contribution.with_referrer(referrer);
        }
        self.store.insert_contribution(contribution.clone())?;
        debug!(
            round = %id,
            contribution = %contribution.id,
            contributor = %contributor,
            amount,
            "contribution recorded"
        );
        Ok(contribution)
    }

    /// Confirm a pending contribution and add it to the round's total raised
    /// in one atomic store call. Returns the new total.
    ///
    /// Late confirmations are accepted after the round ends, but only until
    /// it is prepared: the committed plan covers exactly the total it saw.
    pub fn confirm_contribution(&self, id: &ContributionId) -> EngineResult<Amount> {
        let contribution = self
            .store
            .get_contribution(id)?
            .ok_or(EngineError::ContributionNotFound(*id))?;
        let round = self.round(&contribution.round)?;
        if !matches!(round.status, RoundStatus::Live | RoundStatus::Ended) {
            return Err(PreconditionError::NotAcceptingContributions {
                round: round.id,
                status: round.status,
            }
            .into());
        }
        if round.merkle_root.is_some() || self.store.plan(&round.id)?.is_some() {
            return Err(PreconditionError::AlreadyPrepared(round.id).into());
        }
        check_raise_limit(&round, contribution.amount)?;

        let total = self.store.confirm_contribution(id)?;
        debug!(round = %round.id, contribution = %id, total_raised = total, "contribution confirmed");
        Ok(total)
    }

    /// Finalize an ended round on whichever path its raise allows.
    ///
    /// A raise the tokens for sale cannot settle (only reachable through
    /// contributions recovered from the event log) takes the failure path.
    pub fn finalize(&self, id: &RoundId, auth: &Authorization) -> EngineResult<FinalizeOutcome> {
        self.authorize(auth, Permission::Finalize, id)?;
        let round = self.refresh_totals(id)?;
        self.require_status(&round, RoundStatus::Ended)?;
        if round.soft_cap_met() && !over_capacity(&round)? {
            self.finalize_success(id, auth).map(FinalizeOutcome::Success)
        } else {
            self.finalize_failed(id, auth).map(FinalizeOutcome::Failed)
        }
    }

    /// `ENDED -> FINALIZED_SUCCESS`.
    ///
    /// The round must be prepared. Every chain precondition is read before
    /// anything is written: the vault's committed root, the vault balance,
    /// and the sale contract's token balance. Steps already reflected on
    /// chain are skipped.
    pub fn finalize_success(
        &self,
        id: &RoundId,
        auth: &Authorization,
    ) -> EngineResult<SuccessReceipt> {
        self.authorize(auth, Permission::Finalize, id)?;
        let round = self.round(id)?;
        self.require_status(&round, RoundStatus::Ended)?;
        if !round.soft_cap_met() {
            return Err(EconomicError::SoftCapNotMet {
                round: *id,
                raised: round.total_raised,
                soft_cap: round.terms.soft_cap,
            }
            .into());
        }
        let root = round.merkle_root.ok_or(PreconditionError::NotPrepared(*id))?;
        let plan = self
            .store
            .plan(id)?
            .ok_or(PreconditionError::NotPrepared(*id))?;
        if plan.total_raised != round.total_raised {
            return Err(PreconditionError::PlanOutOfDate {
                round: *id,
                planned: plan.total_raised,
                raised: round.total_raised,
            }
            .into());
        }
        let terms = &round.terms;

        let sale = self
            .chain
            .sale_state(&terms.sale_contract)
            .map_err(|e| e.during("sale_state"))?;
        let vault_root = self
            .chain
            .vesting_root(&terms.vesting_vault)
            .map_err(|e| e.during("vesting_root"))?;
        if let Some(committed) = vault_root.filter(|r| *r != root) {
            return Err(IdempotencyViolation::RootMismatch {
                round: *id,
                committed,
                submitted: root,
            }
            .into());
        }

        let vault_balance = self
            .chain
            .token_balance(&terms.token, &terms.vesting_vault)
            .map_err(|e| e.during("token_balance"))?;
        let vault_funded = vault_balance == plan.total_vesting_allocation;
        if !vault_funded && vault_balance != 0 {
            return Err(PreconditionError::VaultMisfunded {
                round: *id,
                expected: plan.total_vesting_allocation,
                actual: vault_balance,
            }
            .into());
        }
        let required = if vault_funded {
            plan.tokens_for_lp
        } else {
            plan.required_token_balance()
                .ok_or(ValidationError::ArithmeticOverflow("required token balance"))?
        };
        let available = self
            .chain
            .token_balance(&terms.token, &terms.sale_contract)
            .map_err(|e| e.during("token_balance"))?;
        if available < required {
            return Err(PreconditionError::InsufficientTokenBalance {
                round: *id,
                required,
                available,
            }
            .into());
        }

        let root_tx = match vault_root {
            Some(_) => {
                debug!(round = %id, "vault already carries this root");
                None
            }
            None => Some(
                self.chain
                    .set_vesting_root(&terms.vesting_vault, root, plan.total_vesting_allocation)
                    .map_err(|e| e.during("set_vesting_root"))?,
            ),
        };

        let funding = if vault_funded {
            debug!(round = %id, amount = vault_balance, "vault already funded, skipping transfer");
            VaultFunding::AlreadyFunded
        } else {
            VaultFunding::Funded(
                self.chain
                    .fund_vault(
                        &terms.sale_contract,
                        &terms.vesting_vault,
                        plan.total_vesting_allocation,
                    )
                    .map_err(|e| e.during("fund_vault"))?,
            )
        };

        let finalize_tx = self.finalize_on_chain(&round, sale.outcome, SaleOutcome::Success)?;
        self.store
            .compare_and_set_status(id, RoundStatus::Ended, RoundStatus::FinalizedSuccess)?;
        info!(round = %id, root = %root, "round finalized as success");

        Ok(SuccessReceipt {
            round: *id,
            root,
            root_tx,
            funding,
            finalize_tx,
        })
    }

    /// `ENDED -> FINALIZED_FAILED`, opening one refund per confirmed
    /// contributor. Allowed below the soft cap, or when the raise is more
    /// than the tokens for sale can settle.
    pub fn finalize_failed(
        &self,
        id: &RoundId,
        auth: &Authorization,
    ) -> EngineResult<FailureReceipt> {
        self.authorize(auth, Permission::Finalize, id)?;
        let round = self.refresh_totals(id)?;
        self.require_status(&round, RoundStatus::Ended)?;
        if round.soft_cap_met() {
            if !over_capacity(&round)? {
                return Err(PreconditionError::SoftCapReached {
                    round: *id,
                    raised: round.total_raised,
                    soft_cap: round.terms.soft_cap,
                }
                .into());
            }
            warn!(
                round = %id,
                raised = round.total_raised,
                "raise exceeds token capacity, refunding contributors"
            );
        }

        let sale = self
            .chain
            .sale_state(&round.terms.sale_contract)
            .map_err(|e| e.during("sale_state"))?;
        let finalize_tx = self.finalize_on_chain(&round, sale.outcome, SaleOutcome::Failed)?;
        let updated = self
            .store
            .compare_and_set_status(id, RoundStatus::Ended, RoundStatus::FinalizedFailed)?;
        let refunds_opened = self.open_refunds(id)?;
        info!(
            round = %id,
            raised = updated.total_raised,
            soft_cap = updated.terms.soft_cap,
            refunds_opened,
            "round finalized as failed"
        );

        Ok(FailureReceipt {
            round: *id,
            status: updated.status,
            finalize_tx,
            refunds_opened,
        })
    }

    /// `UPCOMING | LIVE -> CANCELLED`. Only before the round ends; every
    /// confirmed contribution becomes refundable.
    pub fn cancel(&self, id: &RoundId, auth: &Authorization) -> EngineResult<FailureReceipt> {
        self.authorize(auth, Permission::Cancel, id)?;
        let round = self.round(id)?;
        match round.status {
            RoundStatus::Upcoming | RoundStatus::Live => {}
            RoundStatus::Ended => return Err(PreconditionError::RoundEnded(*id).into()),
            status => {
                return Err(PreconditionError::WrongStatus {
                    round: *id,
                    expected: RoundStatus::Live,
                    actual: status,
                }
                .into())
            }
        }
        if round.has_ended(auth.at()) {
            return Err(PreconditionError::RoundEnded(*id).into());
        }

        let sale = self
            .chain
            .sale_state(&round.terms.sale_contract)
            .map_err(|e| e.during("sale_state"))?;
        let finalize_tx = self.finalize_on_chain(&round, sale.outcome, SaleOutcome::Cancelled)?;
        let updated = self
            .store
            .compare_and_set_status(id, round.status, RoundStatus::Cancelled)?;
        let refunds_opened = self.open_refunds(id)?;
        info!(round = %id, from = %round.status, refunds_opened, "round cancelled");

        Ok(FailureReceipt {
            round: *id,
            status: updated.status,
            finalize_tx,
            refunds_opened,
        })
    }

    /// Make sure the round's total raised reflects its contributions,
    /// recovering them from the event log when the store has none. A round
    /// with genuinely no contributions keeps its zero total. A scan that
    /// skipped any chunk is a retryable error and changes nothing.
    pub(crate) fn refresh_totals(&self, id: &RoundId) -> EngineResult<Round> {
        let round = self.round(id)?;
        if round.status != RoundStatus::Ended {
            return Ok(round);
        }
        let ledger = ContributionLedger::new(&self.store, &self.chain, self.config.scan.clone());
        match ledger
            .snapshot(id)
            .and_then(LedgerSnapshot::require_complete)
            .map_err(EngineError::from)
        {
            Ok(_) | Err(EngineError::Validation(ValidationError::NoContributors)) => self.round(id),
            Err(err) => Err(err),
        }
    }

    fn finalize_on_chain(
        &self,
        round: &Round,
        current: Option<SaleOutcome>,
        target: SaleOutcome,
    ) -> EngineResult<Option<TxRef>> {
        match current {
            Some(outcome) if outcome == target => {
                debug!(round = %round.id, ?outcome, "sale contract already finalized");
                Ok(None)
            }
            Some(outcome) => Err(EngineError::Reverted {
                call: "finalize_sale",
                reason: format!("sale contract already finalized as {outcome:?}"),
            }),
            None => self
                .chain
                .finalize_sale(&round.terms.sale_contract, target)
                .map(Some)
                .map_err(|e| e.during("finalize_sale")),
        }
    }
}

fn token_capacity(round: &Round) -> EngineResult<Amount> {
    let terms = &round.terms;
    Ok(max_raise(
        terms.tokens_for_sale,
        terms.liquidity_bps,
        terms.token_decimals,
        terms.price_per_token,
    )?)
}

fn over_capacity(round: &Round) -> EngineResult<bool> {
    Ok(round.total_raised > token_capacity(round)?)
}

/// Refuse an amount that would push the round past its hard cap or past
/// what its tokens for sale can settle.
fn check_raise_limit(round: &Round, amount: Amount) -> EngineResult<()> {
    if let Some(remaining) = round.remaining_capacity() {
        if amount > remaining {
            return Err(PreconditionError::HardCapExceeded {
                round: round.id,
                amount,
                remaining,
            }
            .into());
        }
    }
    let remaining = token_capacity(round)?.saturating_sub(round.total_raised);
    if amount > remaining {
        return Err(PreconditionError::TokenCapacityExceeded {
            round: round.id,
            amount,
            remaining,
        }
        .into());
    }
    Ok(())
}
