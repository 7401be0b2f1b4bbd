use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::{self, Amount};
use crate::round::RoundId;
use crate::settlement::TxRef;

/// Unique identifier for a contribution (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContributionId(uuid::Uuid);

impl ContributionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ContributionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContributionId({})", self.short_id())
    }
}

impl fmt::Display for ContributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    /// Recorded but not yet counted toward the raise.
    Pending,
    /// Counted toward `total_raised`. Source of truth for allocation math.
    Confirmed,
    /// Paid back to the contributor.
    Refunded,
}

/// A single payment into a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub round: RoundId,
    pub contributor: Address,
    #[serde(with = "amount")]
    pub amount: Amount,
    pub status: ContributionStatus,
    /// Wallet that referred this contributor, if any.
    #[serde(default)]
    pub referrer: Option<Address>,
    pub created_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(round: RoundId, contributor: Address, amount: Amount, now: DateTime<Utc>) -> Self {
        Self {
            id: ContributionId::new(),
            round,
            contributor,
            amount,
            status: ContributionStatus::Pending,
            referrer: None,
            created_at: now,
        }
    }

    /// Builder: attach a referrer.
    pub fn with_referrer(mut self, referrer: Address) -> Self {
        self.referrer = Some(referrer);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ContributionStatus::Confirmed
    }
}

/// Aggregated confirmed amount for one contributor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorTotal {
    pub address: Address,
    #[serde(with = "amount")]
    pub amount: Amount,
}

impl ContributorTotal {
    pub fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }
}

/// Lifecycle of a refund record.
///
/// `Pending -> InFlight -> Paid`. A failed payout moves `InFlight` back to
/// `Pending` so the contributor can retry; `Paid` is final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RefundStatus {
    Pending,
    InFlight,
    Paid { tx: TxRef },
}

/// What one contributor is owed after a failed or cancelled round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub round: RoundId,
    pub contributor: Address,
    /// Outstanding amount. Zeroed when the payout lands.
    #[serde(with = "amount")]
    pub amount: Amount,
    /// Amount actually paid, kept for audit after `amount` is zeroed.
    #[serde(with = "amount")]
    pub paid: Amount,
    pub status: RefundStatus,
}

impl RefundRecord {
    pub fn pending(round: RoundId, contributor: Address, amount: Amount) -> Self {
        Self {
            round,
            contributor,
            amount,
            paid: 0,
            status: RefundStatus::Pending,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.status, RefundStatus::Paid { .. })
    }
}

/// A completed allocation claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub round: RoundId,
    pub wallet: Address,
    #[serde(with = "amount")]
    pub amount: Amount,
    pub tx: TxRef,
    pub claimed_at: DateTime<Utc>,
}
