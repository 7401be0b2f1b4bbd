use std::collections::BTreeMap;

use presale_alloc::{mul_div, ValidationError};
use presale_ledger::ContributionEventSource;
use presale_store::LaunchStore;
use presale_types::{Address, Amount, ContributionStatus, Permission, RoundId, RoundStatus, TxRef};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::authority::Authorization;
use crate::chain::Chain;
use crate::engine::LaunchEngine;
use crate::error::{EngineResult, IdempotencyViolation, PreconditionError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralPayout {
    pub referrer: Address,
    /// Confirmed volume this referrer brought in.
    #[serde(with = "presale_types::amount")]
    pub referred: Amount,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralReceipt {
    pub round: RoundId,
    #[serde(with = "presale_types::amount")]
    pub pool: Amount,
    pub payouts: Vec<ReferralPayout>,
    /// Rounding remainder, or the whole pool when nobody referred.
    #[serde(with = "presale_types::amount")]
    pub treasury: Amount,
    pub tx: TxRef,
}

impl<S, C> LaunchEngine<S, C>
where
    S: LaunchStore,
    C: Chain + ContributionEventSource,
{
    /// Pay out the referral pool recorded by fee distribution.
    ///
    /// Each referrer gets `floor(pool * referred / total_referred)` over
    /// confirmed contributions. Runs once per round: the fee split is
    /// reserved before the payout, marked processed after it, and released
    /// only when the chain call fails. A reservation left behind by an
    /// interrupted run is never paid again.
    pub fn distribute_referrals(
        &self,
        id: &RoundId,
        auth: &Authorization,
    ) -> EngineResult<ReferralReceipt> {
        self.authorize(auth, Permission::DistributeReferrals, id)?;
        let round = self.round(id)?;
        self.require_status(&round, RoundStatus::FinalizedSuccess)?;
        let split = self
            .store
            .fee_split(id)?
            .ok_or(PreconditionError::FeeSplitMissing(*id))?;
        if split.processed {
            return Err(IdempotencyViolation::FeeSplitProcessed(*id).into());
        }

        let mut referred: BTreeMap<Address, Amount> = BTreeMap::new();
        for c in self.store.contributions_for_round(id)? {
            if c.status != ContributionStatus::Confirmed {
                continue;
            }
            if let Some(referrer) = c.referrer {
                let volume = referred.entry(referrer).or_default();
                *volume = volume
                    .checked_add(c.amount)
                    .ok_or(ValidationError::ArithmeticOverflow("referred volume"))?;
            }
        }
        let total_referred = referred
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
            .ok_or(ValidationError::ArithmeticOverflow("total referred volume"))?;

        let pool = split.referral_pool;
        let mut payouts = Vec::with_capacity(referred.len());
        let mut paid: Amount = 0;
        if total_referred > 0 {
            for (referrer, volume) in referred {
                let amount = mul_div(pool, volume, total_referred, "referral payout")?;
                if amount == 0 {
                    debug!(round = %id, referrer = %referrer, "referral share rounds to zero");
                    continue;
                }
                paid += amount;
                payouts.push(ReferralPayout {
                    referrer,
                    referred: volume,
                    amount,
                });
            }
        }
        let treasury = pool - paid;

        let transfers: Vec<(Address, Amount)> =
            payouts.iter().map(|p| (p.referrer, p.amount)).collect();
        self.store.reserve_fee_split(id)?;
        let tx = match self
            .chain
            .pay_referrals(&round.terms.sale_contract, &transfers, treasury)
        {
            Ok(tx) => tx,
            Err(err) => {
                warn!(round = %id, error = %err, "referral payout failed, releasing");
                self.store.release_fee_split(id)?;
                return Err(err.during("pay_referrals"));
            }
        };
        self.store.mark_fee_split_processed(id)?;
        info!(
            round = %id,
            pool,
            referrers = payouts.len(),
            treasury,
            tx = %tx,
            "referral pool distributed"
        );

        Ok(ReferralReceipt {
            round: *id,
            pool,
            payouts,
            treasury,
            tx,
        })
    }
}
