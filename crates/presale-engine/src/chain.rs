use presale_types::{
    Address, Amount, ChainId, Digest, FeeSplit, SettlementStep, TxRef, BPS_DENOMINATOR,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ExternalDependencyError};

/// Failure from a chain call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The node could not be reached or timed out. Retry later.
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// The call executed and the contract refused it.
    #[error("reverted: {0}")]
    Reverted(String),
}

impl ChainError {
    /// Attach the name of the call that failed.
    pub fn during(self, call: &'static str) -> EngineError {
        match self {
            Self::Unavailable(message) => ExternalDependencyError::Chain { call, message }.into(),
            Self::Reverted(reason) => EngineError::Reverted { call, reason },
        }
    }
}

/// Platform fee configuration read from the chain.
///
/// `fee_bps` is taken from the total raised. The referral and staking shares
/// are taken from the fee itself; the treasury keeps the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub fee_bps: u16,
    pub referral_share_bps: u16,
    pub staking_share_bps: u16,
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_bps > BPS_DENOMINATOR {
            return Err(format!("fee_bps {} above 10000", self.fee_bps));
        }
        let shares = u32::from(self.referral_share_bps) + u32::from(self.staking_share_bps);
        if shares > u32::from(BPS_DENOMINATOR) {
            return Err(format!("fee shares sum to {shares} bps, above 10000"));
        }
        Ok(())
    }
}

/// How a sale contract's lifecycle ended on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Pool tokens received from liquidity provisioning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpPosition {
    pub lp_token: Address,
    #[serde(with = "presale_types::amount")]
    pub amount: Amount,
    pub locked: bool,
}

/// What the chain currently records for a sale contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleState {
    pub outcome: Option<SaleOutcome>,
    /// Last settlement step the contract executed.
    pub step: SettlementStep,
    pub liquidity: Option<LpPosition>,
}

impl Default for SaleState {
    fn default() -> Self {
        Self {
            outcome: None,
            step: SettlementStep::None,
            liquidity: None,
        }
    }
}

/// Liquidity provisioning request with slippage-bounded minimums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidityOrder {
    pub tokens: Amount,
    pub asset: Amount,
    pub min_tokens: Amount,
    pub min_asset: Amount,
}

/// Final release of raised funds plus the unsold-token burn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundsRelease {
    pub owner: Address,
    pub amount: Amount,
    pub burn: Amount,
}

/// Read access to chain state.
pub trait ChainReader: Send + Sync {
    fn token_decimals(&self, token: &Address) -> Result<u8, ChainError>;

    fn fee_config(&self, chain: ChainId) -> Result<FeeConfig, ChainError>;

    fn token_balance(&self, token: &Address, holder: &Address) -> Result<Amount, ChainError>;

    fn sale_state(&self, sale_contract: &Address) -> Result<SaleState, ChainError>;

    /// Root committed in the vesting vault, if any.
    fn vesting_root(&self, vault: &Address) -> Result<Option<Digest>, ChainError>;
}

/// Write access to chain state. Every call returns the transaction that
/// carried it.
pub trait ChainWriter: Send + Sync {
    fn set_vesting_root(
        &self,
        vault: &Address,
        root: Digest,
        total_allocation: Amount,
    ) -> Result<TxRef, ChainError>;

    /// Move `amount` sale tokens from the sale contract into the vault.
    fn fund_vault(
        &self,
        sale_contract: &Address,
        vault: &Address,
        amount: Amount,
    ) -> Result<TxRef, ChainError>;

    fn finalize_sale(&self, sale_contract: &Address, outcome: SaleOutcome) -> Result<TxRef, ChainError>;

    fn distribute_fee(&self, sale_contract: &Address, split: &FeeSplit) -> Result<TxRef, ChainError>;

    fn add_liquidity(
        &self,
        sale_contract: &Address,
        order: LiquidityOrder,
    ) -> Result<TxRef, ChainError>;

    fn lock_liquidity(
        &self,
        sale_contract: &Address,
        duration_secs: u64,
    ) -> Result<TxRef, ChainError>;

    fn release_funds(&self, sale_contract: &Address, release: FundsRelease) -> Result<TxRef, ChainError>;

    fn refund(
        &self,
        sale_contract: &Address,
        contributor: &Address,
        amount: Amount,
    ) -> Result<TxRef, ChainError>;

    fn claim(
        &self,
        vault: &Address,
        wallet: &Address,
        amount: Amount,
        proof: &[Digest],
    ) -> Result<TxRef, ChainError>;

    /// Pay referral rewards out of the referral pool; `treasury` receives
    /// what is left.
    fn pay_referrals(
        &self,
        sale_contract: &Address,
        payouts: &[(Address, Amount)],
        treasury: Amount,
    ) -> Result<TxRef, ChainError>;
}

/// Full chain access.
pub trait Chain: ChainReader + ChainWriter {}

impl<T: ChainReader + ChainWriter> Chain for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_errors_split_by_retryability() {
        let err = ChainError::Unavailable("timeout".into()).during("fee_config");
        assert!(err.is_retryable());

        let err = ChainError::Reverted("already finalized".into()).during("finalize_sale");
        assert_eq!(
            err,
            EngineError::Reverted {
                call: "finalize_sale",
                reason: "already finalized".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn fee_config_shares_bounded() {
        let ok = FeeConfig {
            fee_bps: 200,
            referral_share_bps: 2_500,
            staking_share_bps: 2_500,
        };
        assert!(ok.validate().is_ok());

        let bad = FeeConfig {
            referral_share_bps: 6_000,
            staking_share_bps: 5_000,
            ..ok
        };
        assert!(bad.validate().is_err());
    }
}
