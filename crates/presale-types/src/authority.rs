use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::round::RoundId;

/// An admin action a capability may authorize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Compute allocations and commit the Merkle root.
    Prepare,
    /// Move an ended round to a finalized status.
    Finalize,
    /// Execute post-success settlement steps.
    Settle,
    /// Cancel a round before it ends.
    Cancel,
    /// Pay out the referral fee pool.
    DistributeReferrals,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Finalize => write!(f, "finalize"),
            Self::Settle => write!(f, "settle"),
            Self::Cancel => write!(f, "cancel"),
            Self::DistributeReferrals => write!(f, "distribute_referrals"),
        }
    }
}

/// Scope of a capability grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityScope {
    /// Applies to every round.
    Global,
    /// Scoped to a single round.
    Round(RoundId),
}

/// Authority granted to an operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub operator: Address,
    pub permissions: Vec<Permission>,
    pub scope: CapabilityScope,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Capability {
    pub fn new(operator: Address, scope: CapabilityScope, permissions: Vec<Permission>) -> Self {
        Self {
            operator,
            permissions,
            scope,
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Builder: set an expiry.
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Returns `true` if the capability has expired at the given time.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }

    pub fn covers(&self, round: &RoundId) -> bool {
        match &self.scope {
            CapabilityScope::Global => true,
            CapabilityScope::Round(id) => id == round,
        }
    }

    /// Scope, permission, and expiry all check out.
    pub fn allows(&self, permission: Permission, round: &RoundId, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.covers(round) && self.permissions.contains(&permission)
    }
}
