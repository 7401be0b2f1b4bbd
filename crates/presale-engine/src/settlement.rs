use presale_alloc::apply_bps;
use presale_ledger::ContributionEventSource;
use presale_store::LaunchStore;
use presale_types::{
    FeeSplit, Permission, Round, RoundId, RoundStatus, SettlementPlan, SettlementStep, TxRef,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::authority::Authorization;
use crate::chain::{Chain, FundsRelease, LiquidityOrder, SaleState};
use crate::engine::LaunchEngine;
use crate::error::{EngineError, EngineResult, PreconditionError};

/// How a settlement step call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The chain call was made and the counter advanced.
    Executed,
    /// The step had already completed. Nothing was touched.
    AlreadyDone,
    /// The chain already reflected the step; only the counter advanced.
    Reconciled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReceipt {
    pub round: RoundId,
    pub step: SettlementStep,
    /// Position of `step` in the sequence, 1 through 4.
    pub index: u8,
    pub tx: Option<TxRef>,
    pub outcome: StepOutcome,
}

/// Result of [`LaunchEngine::settle_all`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementRun {
    pub receipts: Vec<StepReceipt>,
    /// The step that stopped the run and why.
    pub failure: Option<(SettlementStep, EngineError)>,
}

impl SettlementRun {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Run one post-success settlement step.
    ///
    /// Steps run strictly in order. A step that already completed returns
    /// [`StepOutcome::AlreadyDone`] without touching the chain, so calling
    /// the same step twice moves no funds the second time. A step the chain
    /// already executed (the counter write was lost after the call) is
    /// reconciled instead of repeated.
    pub fn execute_step(
        &self,
        id: &RoundId,
        step: SettlementStep,
        auth: &Authorization,
    ) -> EngineResult<StepReceipt> {
        self.authorize(auth, Permission::Settle, id)?;
        let round = self.round(id)?;
        self.require_status(&round, RoundStatus::FinalizedSuccess)?;
        let plan = self
            .store
            .plan(id)?
            .ok_or(PreconditionError::NotPrepared(*id))?;

        let current = round.settlement;
        if step != SettlementStep::None && step.is_done_at(current) {
            debug!(round = %id, step = %step, "settlement step already done");
            return Ok(receipt(id, step, None, StepOutcome::AlreadyDone));
        }
        if current.next() != Some(step) {
            return Err(PreconditionError::StepOutOfOrder {
                round: *id,
                requested: step,
                current,
            }
            .into());
        }

        let sale = self
            .chain
            .sale_state(&round.terms.sale_contract)
            .map_err(|e| e.during("sale_state"))?;
        let (tx, outcome) = if step.is_done_at(sale.step) {
            if step == SettlementStep::FeeDistributed {
                self.store.record_fee_split(self.fee_split(&round, &plan)?)?;
            }
            info!(round = %id, step = %step, "settlement step found on chain, reconciling");
            (None, StepOutcome::Reconciled)
        } else {
            let tx = self.run_step(&round, &plan, &sale, step)?;
            (Some(tx), StepOutcome::Executed)
        };

        self.store.advance_settlement(id, current, step)?;
        info!(round = %id, step = %step, index = step.index(), ?outcome, "settlement step complete");
        Ok(receipt(id, step, tx, outcome))
    }

    /// Run every remaining step in order, stopping at the first failure.
    pub fn settle_all(&self, id: &RoundId, auth: &Authorization) -> EngineResult<SettlementRun> {
        let mut current = self.round(id)?.settlement;
        let mut receipts = Vec::new();
        while let Some(step) = current.next() {
            match self.execute_step(id, step, auth) {
                Ok(r) => {
                    receipts.push(r);
                    current = step;
                }
                Err(err) => {
                    warn!(round = %id, step = %step, error = %err, "settlement stopped");
                    return Ok(SettlementRun {
                        receipts,
                        failure: Some((step, err)),
                    });
                }
            }
        }
        Ok(SettlementRun {
            receipts,
            failure: None,
        })
    }

    fn run_step(
        &self,
        round: &Round,
        plan: &SettlementPlan,
        sale: &SaleState,
        step: SettlementStep,
    ) -> EngineResult<TxRef> {
        let contract = &round.terms.sale_contract;
        match step {
            SettlementStep::FeeDistributed => {
                let split = self.store.record_fee_split(self.fee_split(round, plan)?)?;
                self.chain
                    .distribute_fee(contract, &split)
                    .map_err(|e| e.during("distribute_fee"))
            }
            SettlementStep::LiquidityAdded => {
                let order = LiquidityOrder {
                    tokens: plan.tokens_for_lp,
                    asset: plan.lp_asset,
                    min_tokens: plan.min_tokens_for_lp,
                    min_asset: plan.min_asset_for_lp,
                };
                self.chain
                    .add_liquidity(contract, order)
                    .map_err(|e| e.during("add_liquidity"))
            }
            SettlementStep::LpLocked => {
                if sale.liquidity.is_none() {
                    return Err(PreconditionError::NoLiquidityPosition(round.id).into());
                }
                self.chain
                    .lock_liquidity(contract, plan.lock_duration_secs)
                    .map_err(|e| e.during("lock_liquidity"))
            }
            SettlementStep::FundsDistributed => {
                let release = FundsRelease {
                    owner: round.terms.owner,
                    amount: plan.owner_release,
                    burn: plan.unsold_to_burn,
                };
                self.chain
                    .release_funds(contract, release)
                    .map_err(|e| e.during("release_funds"))
            }
            SettlementStep::None => Err(PreconditionError::StepOutOfOrder {
                round: round.id,
                requested: step,
                current: round.settlement,
            }
            .into()),
        }
    }

    /// Split the planned fee by the chain's current share configuration.
    /// The treasury keeps whatever the referral and staking shares leave.
    fn fee_split(&self, round: &Round, plan: &SettlementPlan) -> EngineResult<FeeSplit> {
        let fee = self
            .chain
            .fee_config(round.terms.chain_id)
            .map_err(|e| e.during("fee_config"))?;
        fee.validate()
            .map_err(|msg| EngineError::Config(format!("chain fee configuration: {msg}")))?;
        if fee.fee_bps != plan.fee_bps {
            warn!(
                round = %round.id,
                planned = plan.fee_bps,
                chain = fee.fee_bps,
                "fee rate changed since preparation, keeping planned amount"
            );
        }

        let total = plan.fee_amount;
        let referral_pool = apply_bps(total, fee.referral_share_bps, "referral pool")?;
        let staking = apply_bps(total, fee.staking_share_bps, "staking share")?;
        Ok(FeeSplit {
            round: round.id,
            total,
            treasury: total - referral_pool - staking,
            referral_pool,
            staking,
            processed: false,
        })
    }
}

fn receipt(id: &RoundId, step: SettlementStep, tx: Option<TxRef>, outcome: StepOutcome) -> StepReceipt {
    StepReceipt {
        round: *id,
        step,
        index: step.index(),
        tx,
        outcome,
    }
}
