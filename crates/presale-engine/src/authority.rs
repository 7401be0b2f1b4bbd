use chrono::{DateTime, Utc};
use presale_crypto::{OperatorGrant, VerifyingKey};
use presale_types::{Address, Permission, RoundId};
use tracing::warn;

use crate::error::PreconditionError;

/// A signed operator grant presented for one call, with the time it is
/// evaluated at.
///
/// Admin transitions take this explicitly. There is no ambient "current
/// operator".
#[derive(Clone, Debug)]
pub struct Authorization {
    grant: OperatorGrant,
    at: DateTime<Utc>,
}

impl Authorization {
    pub fn new(grant: OperatorGrant, at: DateTime<Utc>) -> Self {
        Self { grant, at }
    }

    pub fn operator(&self) -> Address {
        self.grant.capability.operator
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn grant(&self) -> &OperatorGrant {
        &self.grant
    }
}

/// Issuer keys whose grants the engine accepts.
#[derive(Clone, Debug, Default)]
pub struct TrustedIssuers {
    keys: Vec<VerifyingKey>,
}

impl TrustedIssuers {
    pub fn new(keys: Vec<VerifyingKey>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Admit `auth` for `permission` on `round`, or say why not.
    pub fn check(
        &self,
        auth: &Authorization,
        permission: Permission,
        round: &RoundId,
    ) -> Result<(), PreconditionError> {
        let deny = |reason: &str| {
            warn!(
                round = %round,
                operator = %auth.operator(),
                permission = %permission,
                reason,
                "authorization denied"
            );
            PreconditionError::Unauthorized {
                round: *round,
                permission,
                reason: reason.to_string(),
            }
        };

        let grant = auth.grant();
        if !self.keys.contains(&grant.issuer) {
            return Err(deny("issuer is not trusted"));
        }
        if grant.verify_signature().is_err() {
            return Err(deny("grant signature is invalid"));
        }
        let capability = &grant.capability;
        if auth.at() < capability.granted_at {
            return Err(deny("grant is not yet valid"));
        }
        if capability.is_expired_at(auth.at()) {
            return Err(deny("grant has expired"));
        }
        if !capability.covers(round) {
            return Err(deny("grant does not cover this round"));
        }
        if !capability.permissions.contains(&permission) {
            return Err(deny("permission not granted"));
        }
        Ok(())
    }
}
