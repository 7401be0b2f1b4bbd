use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::{self, Amount};
use crate::digest::Digest;
use crate::round::RoundId;

/// One team wallet and its share of the team allocation, in whole percent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamWalletShare {
    pub address: Address,
    pub percent: u8,
}

impl TeamWalletShare {
    pub fn new(address: Address, percent: u8) -> Self {
        Self { address, percent }
    }
}

/// How [`TeamAllocation::value`] is to be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamAllocationFormat {
    /// Whole percent of total supply (0..=100).
    Percent,
    /// Basis points of total supply (0..=10000).
    BasisPoints,
    /// Raw count of whole tokens, scaled by `10^decimals`.
    Tokens,
}

impl fmt::Display for TeamAllocationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent => write!(f, "percent"),
            Self::BasisPoints => write!(f, "basis_points"),
            Self::Tokens => write!(f, "tokens"),
        }
    }
}

/// The round's team allocation field.
///
/// `format` is `None` only for legacy rounds submitted before the format was
/// recorded. Those are rejected unless legacy inference is switched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAllocation {
    #[serde(with = "amount")]
    pub value: Amount,
    #[serde(default)]
    pub format: Option<TeamAllocationFormat>,
}

impl TeamAllocation {
    pub fn new(value: Amount, format: TeamAllocationFormat) -> Self {
        Self {
            value,
            format: Some(format),
        }
    }

    /// A value with no declared format.
    pub fn legacy(value: Amount) -> Self {
        Self {
            value,
            format: None,
        }
    }
}

/// Total tokens owed to one beneficiary. Investor and team amounts for the
/// same address are merged into a single row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub round: RoundId,
    pub beneficiary: Address,
    #[serde(with = "amount")]
    pub total: Amount,
}

impl Allocation {
    pub fn new(round: RoundId, beneficiary: Address, total: Amount) -> Self {
        Self {
            round,
            beneficiary,
            total,
        }
    }
}

/// A persisted Merkle proof for one wallet.
///
/// `amount` duplicates the allocation for audit. The whole record can be
/// rebuilt from the round's allocations and binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub round: RoundId,
    pub wallet: Address,
    #[serde(with = "amount")]
    pub amount: Amount,
    pub siblings: Vec<Digest>,
}
