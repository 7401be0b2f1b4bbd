use std::collections::BTreeMap;

use presale_types::{
    Address, Allocation, Amount, ContributorTotal, Round, RoundId, SettlementPlan,
    TeamAllocation, TeamWalletShare,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::liquidity::{check_bps, liquidity_plan};
use crate::math::{pow10, tokens_for_amount};
use crate::team::{distribute_team_tokens, resolve_team_tokens, ResolvedTeam};

/// Everything the calculator reads. Built from a round, its contribution
/// snapshot, and the chain-side fee rate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationInputs {
    pub round: RoundId,
    pub contributions: Vec<ContributorTotal>,
    pub price_per_token: Amount,
    pub token_decimals: u8,
    pub tokens_for_sale: Amount,
    pub total_supply: Option<Amount>,
    /// Fee rate from the chain's fee configuration.
    pub fee_bps: u16,
    pub liquidity_bps: u16,
    pub slippage_bps: u16,
    pub lock_duration_secs: u64,
    pub team_allocation: Option<TeamAllocation>,
    pub team_wallets: Vec<TeamWalletShare>,
    pub infer_legacy_team_format: bool,
}

impl AllocationInputs {
    /// Inputs for `round`. `fee_bps` must come from the chain, never from
    /// the round's own submitted terms.
    pub fn from_round(round: &Round, contributions: Vec<ContributorTotal>, fee_bps: u16) -> Self {
        let terms = &round.terms;
        Self {
            round: round.id,
            contributions,
            price_per_token: terms.price_per_token,
            token_decimals: terms.token_decimals,
            tokens_for_sale: terms.tokens_for_sale,
            total_supply: terms.total_supply,
            fee_bps,
            liquidity_bps: terms.liquidity_bps,
            slippage_bps: 0,
            lock_duration_secs: terms.lock_duration_secs,
            team_allocation: terms.team_allocation,
            team_wallets: terms.team_wallets.clone(),
            infer_legacy_team_format: false,
        }
    }

    /// Builder: slippage tolerance for liquidity minimums.
    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    /// Builder: allow magnitude-based inference for undeclared team formats.
    pub fn with_legacy_team_inference(mut self, enabled: bool) -> Self {
        self.infer_legacy_team_format = enabled;
        self
    }
}

/// Output of a successful calculation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AllocationPlan {
    pub round: RoundId,
    /// One row per beneficiary, ordered by address, investor and team
    /// amounts merged.
    pub allocations: Vec<Allocation>,
    /// Investor tokens before merging, ordered by address.
    pub investor_tokens: Vec<(Address, Amount)>,
    /// Team tokens before merging, in team-wallet order.
    pub team_tokens: Vec<(Address, Amount)>,
    pub team: Option<ResolvedTeam>,
    /// Contributors whose amount bought less than one token base unit.
    pub zero_token_contributors: Vec<Address>,
    pub settlement: SettlementPlan,
}

impl AllocationPlan {
    pub fn total_allocation(&self) -> Amount {
        self.settlement.total_vesting_allocation
    }

    pub fn allocation_for(&self, wallet: &Address) -> Option<Amount> {
        self.allocations
            .iter()
            .find(|a| a.beneficiary == *wallet)
            .map(|a| a.total)
    }
}

/// Converts contributions and sale parameters into allocations.
pub struct AllocationCalculator {
    inputs: AllocationInputs,
}

impl AllocationCalculator {
    pub fn new(inputs: AllocationInputs) -> Self {
        Self { inputs }
    }

    pub fn inputs(&self) -> &AllocationInputs {
        &self.inputs
    }

    pub fn calculate(&self) -> Result<AllocationPlan, ValidationError> {
        let inputs = &self.inputs;
        self.validate()?;

        // Team first: a malformed team config must fail before anything else
        // is derived.
        let (team, team_tokens) = self.team_tokens()?;

        let mut total_raised: Amount = 0;
        let mut tokens_sold: Amount = 0;
        let mut investor_tokens = Vec::with_capacity(inputs.contributions.len());
        let mut zero_token_contributors = Vec::new();
        let mut merged: BTreeMap<Address, Amount> = BTreeMap::new();

        for contribution in &inputs.contributions {
            if contribution.address.is_zero() {
                return Err(ValidationError::ZeroAddress {
                    field: "contributor",
                });
            }
            total_raised = total_raised
                .checked_add(contribution.amount)
                .ok_or(ValidationError::ArithmeticOverflow("total raised"))?;
            let tokens = tokens_for_amount(
                contribution.amount,
                inputs.token_decimals,
                inputs.price_per_token,
            )?;
            if tokens == 0 {
                warn!(
                    round = %inputs.round,
                    contributor = %contribution.address,
                    amount = contribution.amount,
                    "contribution buys zero tokens, excluded from allocation"
                );
                zero_token_contributors.push(contribution.address);
                continue;
            }
            tokens_sold = tokens_sold
                .checked_add(tokens)
                .ok_or(ValidationError::ArithmeticOverflow("tokens sold"))?;
            investor_tokens.push((contribution.address, tokens));
            add_to(&mut merged, contribution.address, tokens)?;
        }

        let mut team_total: Amount = 0;
        for (address, tokens) in &team_tokens {
            team_total += *tokens;
            if *tokens > 0 {
                add_to(&mut merged, *address, *tokens)?;
            }
        }

        if merged.is_empty() {
            return Err(ValidationError::NoAllocations);
        }

        let liquidity = liquidity_plan(
            total_raised,
            inputs.fee_bps,
            inputs.liquidity_bps,
            inputs.slippage_bps,
            inputs.token_decimals,
            inputs.price_per_token,
        )?;

        let committed = tokens_sold
            .checked_add(liquidity.tokens_for_lp)
            .ok_or(ValidationError::ArithmeticOverflow("sold plus liquidity tokens"))?;
        if committed > inputs.tokens_for_sale {
            return Err(ValidationError::TokenSupplyExceeded {
                sold: tokens_sold,
                for_lp: liquidity.tokens_for_lp,
                for_sale: inputs.tokens_for_sale,
            });
        }
        let unsold_to_burn = inputs.tokens_for_sale - committed;

        let allocations: Vec<Allocation> = merged
            .into_iter()
            .map(|(beneficiary, total)| Allocation::new(inputs.round, beneficiary, total))
            .collect();
        let total_vesting_allocation = allocations.iter().map(|a| a.total).sum();
        investor_tokens.sort_by_key(|(address, _)| *address);

        debug!(
            round = %inputs.round,
            beneficiaries = allocations.len(),
            tokens_sold,
            team_total,
            unsold_to_burn,
            "allocation computed"
        );

        Ok(AllocationPlan {
            round: inputs.round,
            allocations,
            investor_tokens,
            team_tokens,
            team,
            zero_token_contributors,
            settlement: SettlementPlan {
                round: inputs.round,
                fee_bps: inputs.fee_bps,
                total_raised,
                fee_amount: liquidity.fee_amount,
                net_after_fee: liquidity.net_after_fee,
                lp_asset: liquidity.lp_asset,
                tokens_for_lp: liquidity.tokens_for_lp,
                min_tokens_for_lp: liquidity.min_tokens_for_lp,
                min_asset_for_lp: liquidity.min_asset_for_lp,
                tokens_sold,
                team_tokens: team_total,
                unsold_to_burn,
                total_vesting_allocation,
                owner_release: liquidity.owner_release,
                lock_duration_secs: inputs.lock_duration_secs,
            },
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let inputs = &self.inputs;
        if inputs.tokens_for_sale == 0 {
            return Err(ValidationError::ZeroTokensForSale);
        }
        if inputs.price_per_token == 0 {
            return Err(ValidationError::ZeroPrice);
        }
        pow10(inputs.token_decimals)?;
        check_bps("fee_bps", inputs.fee_bps)?;
        check_bps("liquidity_bps", inputs.liquidity_bps)?;
        check_bps("slippage_bps", inputs.slippage_bps)?;
        if inputs.contributions.is_empty() {
            return Err(ValidationError::NoContributors);
        }
        Ok(())
    }

    fn team_tokens(&self) -> Result<(Option<ResolvedTeam>, Vec<(Address, Amount)>), ValidationError> {
        let inputs = &self.inputs;
        match (&inputs.team_allocation, inputs.team_wallets.is_empty()) {
            (None, true) => Ok((None, Vec::new())),
            (Some(team), true) if team.value == 0 => Ok((None, Vec::new())),
            (Some(team), true) => Err(ValidationError::TeamAllocationWithoutWallets(team.value)),
            (None, false) => Err(ValidationError::TeamWalletsWithoutAllocation),
            (Some(team), false) => {
                let resolved = resolve_team_tokens(
                    team,
                    inputs.token_decimals,
                    inputs.total_supply,
                    inputs.infer_legacy_team_format,
                )?;
                let parts = distribute_team_tokens(resolved.tokens, &inputs.team_wallets)?;
                Ok((Some(resolved), parts))
            }
        }
    }
}

fn add_to(
    merged: &mut BTreeMap<Address, Amount>,
    address: Address,
    tokens: Amount,
) -> Result<(), ValidationError> {
    let entry = merged.entry(address).or_default();
    *entry = entry
        .checked_add(tokens)
        .ok_or(ValidationError::ArithmeticOverflow("merged allocation"))?;
    Ok(())
}
