use std::collections::BTreeSet;

use presale_types::{Address, Amount, TeamAllocation, TeamAllocationFormat, TeamWalletShare};
use serde::Serialize;
use tracing::warn;

use crate::error::ValidationError;
use crate::math::{mul_div, pow10};

/// Legacy values at or below this are read as percent.
const LEGACY_PERCENT_MAX: Amount = 50;
/// Legacy values at or above this are read as whole tokens.
const LEGACY_TOKENS_MIN: Amount = 10_000;

/// Team allocation after its format is settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedTeam {
    pub format: TeamAllocationFormat,
    /// Inferred from magnitude rather than declared.
    pub inferred: bool,
    /// Team tokens in base units.
    pub tokens: Amount,
}

/// Turn the round's team allocation field into a token quantity.
///
/// `total_supply` is in token base units and is the base for percent and
/// basis-point formats. A value with no declared format is rejected unless
/// `infer_legacy` is set, in which case it is classified by magnitude:
/// `<= 50` percent, `>= 10000` whole tokens, and anything between is basis
/// points only when a supply exists to read it against. Otherwise it fails.
pub fn resolve_team_tokens(
    allocation: &TeamAllocation,
    decimals: u8,
    total_supply: Option<Amount>,
    infer_legacy: bool,
) -> Result<ResolvedTeam, ValidationError> {
    let value = allocation.value;
    let (format, inferred) = match allocation.format {
        Some(format) => (format, false),
        None if infer_legacy => (infer_format(value, total_supply.is_some())?, true),
        None => return Err(ValidationError::MissingTeamFormat { value }),
    };
    if inferred {
        warn!(value, format = %format, "team allocation format inferred from magnitude");
    }

    let tokens = match format {
        TeamAllocationFormat::Percent => {
            if value > 100 {
                return Err(ValidationError::TeamAllocationOutOfRange { value, format });
            }
            let supply = total_supply.ok_or(ValidationError::MissingTotalSupply(format))?;
            mul_div(supply, value, 100, "team tokens")?
        }
        TeamAllocationFormat::BasisPoints => {
            if value > 10_000 {
                return Err(ValidationError::TeamAllocationOutOfRange { value, format });
            }
            let supply = total_supply.ok_or(ValidationError::MissingTotalSupply(format))?;
            mul_div(supply, value, 10_000, "team tokens")?
        }
        TeamAllocationFormat::Tokens => value
            .checked_mul(pow10(decimals)?)
            .ok_or(ValidationError::ArithmeticOverflow("team tokens"))?,
    };

    Ok(ResolvedTeam {
        format,
        inferred,
        tokens,
    })
}

fn infer_format(value: Amount, has_supply: bool) -> Result<TeamAllocationFormat, ValidationError> {
    if value <= LEGACY_PERCENT_MAX {
        Ok(TeamAllocationFormat::Percent)
    } else if value >= LEGACY_TOKENS_MIN {
        Ok(TeamAllocationFormat::Tokens)
    } else if has_supply {
        Ok(TeamAllocationFormat::BasisPoints)
    } else {
        Err(ValidationError::AmbiguousTeamAllocation { value })
    }
}

/// Shares must name distinct non-zero addresses and sum to exactly 100.
pub fn validate_team_wallets(wallets: &[TeamWalletShare]) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    let mut sum: u32 = 0;
    for share in wallets {
        if share.address.is_zero() {
            return Err(ValidationError::ZeroAddress {
                field: "team wallet",
            });
        }
        if !seen.insert(share.address) {
            return Err(ValidationError::DuplicateTeamWallet(share.address));
        }
        sum += u32::from(share.percent);
    }
    if !wallets.is_empty() && sum != 100 {
        return Err(ValidationError::TeamShareSum { sum });
    }
    Ok(())
}

/// Split `total` across `wallets` by share.
///
/// Each wallet gets `floor(total * percent / 100)`. The rounding remainder
/// goes to the wallet with the largest share (the first one on a tie), so
/// the parts always sum to `total`.
pub fn distribute_team_tokens(
    total: Amount,
    wallets: &[TeamWalletShare],
) -> Result<Vec<(Address, Amount)>, ValidationError> {
    validate_team_wallets(wallets)?;
    if wallets.is_empty() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::with_capacity(wallets.len());
    let mut assigned: Amount = 0;
    for share in wallets {
        let part = mul_div(total, u128::from(share.percent), 100, "team share")?;
        assigned += part;
        parts.push((share.address, part));
    }

    let remainder = total - assigned;
    if remainder > 0 {
        let largest = wallets
            .iter()
            .enumerate()
            .fold(0, |best, (i, share)| {
                if share.percent > wallets[best].percent {
                    i
                } else {
                    best
                }
            });
        parts[largest].1 += remainder;
    }
    Ok(parts)
}
