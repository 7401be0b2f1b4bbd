use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::amount::{self, Amount};
use crate::error::TypeError;
use crate::round::RoundId;

/// Persisted counter gating the post-success settlement sequence.
///
/// Steps complete strictly in declaration order. The value stored on a round
/// is the last step that completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStep {
    None,
    FeeDistributed,
    LiquidityAdded,
    LpLocked,
    FundsDistributed,
}

impl SettlementStep {
    /// Every executable step, in order.
    pub const SEQUENCE: [SettlementStep; 4] = [
        Self::FeeDistributed,
        Self::LiquidityAdded,
        Self::LpLocked,
        Self::FundsDistributed,
    ];

    pub fn index(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::FeeDistributed => 1,
            Self::LiquidityAdded => 2,
            Self::LpLocked => 3,
            Self::FundsDistributed => 4,
        }
    }

    /// The step that may run after this one.
    pub fn next(&self) -> Option<SettlementStep> {
        match self {
            Self::None => Some(Self::FeeDistributed),
            Self::FeeDistributed => Some(Self::LiquidityAdded),
            Self::LiquidityAdded => Some(Self::LpLocked),
            Self::LpLocked => Some(Self::FundsDistributed),
            Self::FundsDistributed => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        *self == Self::FundsDistributed
    }

    /// Whether `self` has already been reached by a round at `current`.
    pub fn is_done_at(&self, current: SettlementStep) -> bool {
        current >= *self
    }
}

impl fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::FeeDistributed => "FEE_DISTRIBUTED",
            Self::LiquidityAdded => "LIQUIDITY_ADDED",
            Self::LpLocked => "LP_LOCKED",
            Self::FundsDistributed => "FUNDS_DISTRIBUTED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SettlementStep {
    type Err = TypeError;

    /// Accepts the display form and the short names operators type
    /// (`fee`, `liquidity`, `lock`, `release`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "fee_distributed" | "fee" | "fees" => Ok(Self::FeeDistributed),
            "liquidity_added" | "liquidity" | "lp" => Ok(Self::LiquidityAdded),
            "lp_locked" | "lock" => Ok(Self::LpLocked),
            "funds_distributed" | "release" | "funds" => Ok(Self::FundsDistributed),
            _ => Err(TypeError::UnknownStep(s.to_string())),
        }
    }
}

/// Opaque on-chain transaction reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fee split recorded by the fee-distribution step.
///
/// `referral_pool` is paid out later by referral distribution, exactly once,
/// gated by `processed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub round: RoundId,
    #[serde(with = "amount")]
    pub total: Amount,
    #[serde(with = "amount")]
    pub treasury: Amount,
    #[serde(with = "amount")]
    pub referral_pool: Amount,
    #[serde(with = "amount")]
    pub staking: Amount,
    pub processed: bool,
}

/// Quantities the settlement steps act on, fixed when a round is prepared.
///
/// Token quantities are in sale-token base units, asset quantities in
/// raise-asset base units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub round: RoundId,
    /// Fee rate read from the chain at preparation time.
    pub fee_bps: u16,
    #[serde(with = "amount")]
    pub total_raised: Amount,
    #[serde(with = "amount")]
    pub fee_amount: Amount,
    #[serde(with = "amount")]
    pub net_after_fee: Amount,
    #[serde(with = "amount")]
    pub lp_asset: Amount,
    #[serde(with = "amount")]
    pub tokens_for_lp: Amount,
    #[serde(with = "amount")]
    pub min_tokens_for_lp: Amount,
    #[serde(with = "amount")]
    pub min_asset_for_lp: Amount,
    #[serde(with = "amount")]
    pub tokens_sold: Amount,
    #[serde(with = "amount")]
    pub team_tokens: Amount,
    #[serde(with = "amount")]
    pub unsold_to_burn: Amount,
    /// Sum of every allocation committed in the Merkle tree.
    #[serde(with = "amount")]
    pub total_vesting_allocation: Amount,
    /// Raised funds left for the owner after fee and liquidity.
    #[serde(with = "amount")]
    pub owner_release: Amount,
    pub lock_duration_secs: u64,
}

impl SettlementPlan {
    /// Tokens the sale contract must hold before finalizing: every vesting
    /// allocation plus the liquidity reservation.
    pub fn required_token_balance(&self) -> Option<Amount> {
        self.total_vesting_allocation.checked_add(self.tokens_for_lp)
    }
}
