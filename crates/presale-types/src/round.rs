use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::allocation::{TeamAllocation, TeamWalletShare};
use crate::amount::{self, Amount};
use crate::digest::{Digest, ScheduleSalt};
use crate::error::TypeError;
use crate::settlement::SettlementStep;

/// Unique identifier for a round (UUID v7, time-ordered).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundId(uuid::Uuid);

impl RoundId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// First 8 characters of the UUID.
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RoundId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidRoundId(e.to_string()))
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({})", self.short_id())
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// EVM-style chain identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset contributors pay in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaiseAsset {
    /// The chain's native coin.
    Native,
    /// An ERC-20 style token at the given address.
    Token(Address),
}

/// Round lifecycle status.
///
/// ```text
/// UPCOMING -> LIVE -> ENDED -> { FINALIZED_SUCCESS | FINALIZED_FAILED }
/// UPCOMING | LIVE -> CANCELLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Upcoming,
    Live,
    Ended,
    FinalizedSuccess,
    FinalizedFailed,
    Cancelled,
}

impl RoundStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalizedSuccess | Self::FinalizedFailed | Self::Cancelled
        )
    }

    /// Returns `true` once the round has reached either finalization outcome.
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::FinalizedSuccess | Self::FinalizedFailed)
    }

    /// Statuses from which contributors may pull their funds back.
    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::FinalizedFailed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Upcoming, Live)
                | (Live, Ended)
                | (Ended, FinalizedSuccess)
                | (Ended, FinalizedFailed)
                | (Upcoming, Cancelled)
                | (Live, Cancelled)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Upcoming => "UPCOMING",
            Self::Live => "LIVE",
            Self::Ended => "ENDED",
            Self::FinalizedSuccess => "FINALIZED_SUCCESS",
            Self::FinalizedFailed => "FINALIZED_FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Terms fixed at round submission.
///
/// `price_per_token` is the raise-asset base units paid for one whole token
/// (`10^token_decimals` base units). `fee_bps` is what the submitter claimed;
/// settlement always uses the chain-side fee configuration instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTerms {
    pub chain_id: ChainId,
    pub raise_asset: RaiseAsset,
    pub token: Address,
    pub token_decimals: u8,
    /// Contract that holds sale tokens and executes settlement.
    pub sale_contract: Address,
    pub vesting_vault: Address,
    pub owner: Address,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(with = "amount")]
    pub soft_cap: Amount,
    #[serde(default, with = "amount::opt")]
    pub hard_cap: Option<Amount>,
    #[serde(with = "amount")]
    pub price_per_token: Amount,
    #[serde(with = "amount")]
    pub tokens_for_sale: Amount,
    /// Supply the team allocation percentage is taken from, when known.
    #[serde(default, with = "amount::opt")]
    pub total_supply: Option<Amount>,
    pub liquidity_bps: u16,
    pub lock_duration_secs: u64,
    #[serde(default)]
    pub fee_bps: u16,
    #[serde(default)]
    pub team_allocation: Option<TeamAllocation>,
    #[serde(default)]
    pub team_wallets: Vec<TeamWalletShare>,
    pub schedule_salt: ScheduleSalt,
}

/// A fundraising round: immutable terms plus the fields the state machine
/// mutates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub terms: RoundTerms,
    pub status: RoundStatus,
    #[serde(with = "amount")]
    pub total_raised: Amount,
    pub merkle_root: Option<Digest>,
    pub settlement: SettlementStep,
}

impl Round {
    /// A freshly submitted round in `Upcoming` with nothing raised.
    pub fn new(id: RoundId, terms: RoundTerms) -> Self {
        Self {
            id,
            terms,
            status: RoundStatus::Upcoming,
            total_raised: 0,
            merkle_root: None,
            settlement: SettlementStep::None,
        }
    }

    pub fn soft_cap_met(&self) -> bool {
        self.total_raised >= self.terms.soft_cap
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.terms.start_at
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.terms.end_at
    }

    /// Room left under the hard cap, if one is set.
    pub fn remaining_capacity(&self) -> Option<Amount> {
        self.terms
            .hard_cap
            .map(|cap| cap.saturating_sub(self.total_raised))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn terms() -> RoundTerms {
        RoundTerms {
            chain_id: ChainId(1),
            raise_asset: RaiseAsset::Native,
            token: Address::from_bytes([1; 20]),
            token_decimals: 18,
            sale_contract: Address::from_bytes([2; 20]),
            vesting_vault: Address::from_bytes([3; 20]),
            owner: Address::from_bytes([4; 20]),
            start_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap(),
            soft_cap: 1_000_000_000_000_000_000,
            hard_cap: Some(2_000_000_000_000_000_000),
            price_per_token: 100_000_000_000_000,
            tokens_for_sale: 20_000 * 10u128.pow(18),
            total_supply: None,
            liquidity_bps: 5_000,
            lock_duration_secs: 86_400 * 180,
            fee_bps: 200,
            team_allocation: None,
            team_wallets: vec![],
            schedule_salt: ScheduleSalt::from_bytes([9; 32]),
        }
    }

    #[test]
    fn new_round_is_upcoming() {
        let round = Round::new(RoundId::new(), terms());
        assert_eq!(round.status, RoundStatus::Upcoming);
        assert_eq!(round.total_raised, 0);
        assert!(round.merkle_root.is_none());
        assert_eq!(round.settlement, SettlementStep::None);
    }

    #[test]
    fn legal_transitions() {
        use RoundStatus::*;
        assert!(Upcoming.can_transition_to(Live));
        assert!(Live.can_transition_to(Ended));
        assert!(Ended.can_transition_to(FinalizedSuccess));
        assert!(Ended.can_transition_to(FinalizedFailed));
        assert!(Live.can_transition_to(Cancelled));
        assert!(Upcoming.can_transition_to(Cancelled));
    }

    #[test]
    fn illegal_transitions() {
        use RoundStatus::*;
        assert!(!Ended.can_transition_to(Cancelled));
        assert!(!Live.can_transition_to(FinalizedSuccess));
        assert!(!FinalizedSuccess.can_transition_to(FinalizedFailed));
        assert!(!FinalizedFailed.can_transition_to(FinalizedSuccess));
        assert!(!Cancelled.can_transition_to(Live));
        assert!(!Upcoming.can_transition_to(Ended));
    }

    fn any_status() -> impl Strategy<Value = RoundStatus> {
        prop::sample::select(vec![
            RoundStatus::Upcoming,
            RoundStatus::Live,
            RoundStatus::Ended,
            RoundStatus::FinalizedSuccess,
            RoundStatus::FinalizedFailed,
            RoundStatus::Cancelled,
        ])
    }

    proptest! {
        #[test]
        fn terminal_statuses_have_no_successor(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
            if from.can_transition_to(to) {
                prop_assert!(from != to);
                prop_assert!(!to.can_transition_to(from));
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(RoundStatus::FinalizedSuccess.is_terminal());
        assert!(RoundStatus::FinalizedFailed.is_terminal());
        assert!(RoundStatus::Cancelled.is_terminal());
        assert!(!RoundStatus::Ended.is_terminal());
    }

    #[test]
    fn soft_cap_and_capacity() {
        let mut round = Round::new(RoundId::new(), terms());
        round.total_raised = 1_100_000_000_000_000_000;
        assert!(round.soft_cap_met());
        assert_eq!(round.remaining_capacity(), Some(900_000_000_000_000_000));
    }

    #[test]
    fn timing_checks() {
        let round = Round::new(RoundId::new(), terms());
        let before = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
        let during = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap();
        assert!(!round.has_started(before));
        assert!(round.has_started(during) && !round.has_ended(during));
        assert!(round.has_ended(after));
    }

    #[test]
    fn status_display_matches_serde() {
        let json = serde_json::to_string(&RoundStatus::FinalizedSuccess).unwrap();
        assert_eq!(json, "\"FINALIZED_SUCCESS\"");
        assert_eq!(RoundStatus::FinalizedSuccess.to_string(), "FINALIZED_SUCCESS");
    }

    #[test]
    fn round_id_parses_from_display() {
        let id = RoundId::new();
        let parsed: RoundId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<RoundId>().is_err());
    }

    #[test]
    fn terms_roundtrip_through_json() {
        let round = Round::new(RoundId::new(), terms());
        let json = serde_json::to_string(&round).unwrap();
        let parsed: Round = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, round);
    }
}
