use presale_types::{Amount, BPS_DENOMINATOR};
use serde::Serialize;

use crate::error::ValidationError;
use crate::math::{apply_bps, mul_div, pow10, tokens_for_amount};

/// Fee and liquidity quantities derived from the total raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LiquidityPlan {
    pub fee_amount: Amount,
    pub net_after_fee: Amount,
    /// Raise asset paired into the pool.
    pub lp_asset: Amount,
    /// Sale tokens paired into the pool.
    pub tokens_for_lp: Amount,
    pub min_tokens_for_lp: Amount,
    pub min_asset_for_lp: Amount,
    /// What is left for the project owner.
    pub owner_release: Amount,
}

/// Compute fee, liquidity, and slippage-bounded minimums.
///
/// ```text
/// fee          = raised * fee_bps / 10000
/// net          = raised - fee
/// lp_asset     = net * lp_bps / 10000
/// tokens_for_lp = lp_asset * 10^decimals / price
/// min_x        = x * (10000 - slippage_bps) / 10000   (both sides)
/// ```
pub fn liquidity_plan(
    total_raised: Amount,
    fee_bps: u16,
    liquidity_bps: u16,
    slippage_bps: u16,
    decimals: u8,
    price_per_token: Amount,
) -> Result<LiquidityPlan, ValidationError> {
    check_bps("fee_bps", fee_bps)?;
    check_bps("liquidity_bps", liquidity_bps)?;
    check_bps("slippage_bps", slippage_bps)?;

    let fee_amount = apply_bps(total_raised, fee_bps, "fee")?;
    let net_after_fee = total_raised - fee_amount;
    let lp_asset = apply_bps(net_after_fee, liquidity_bps, "liquidity asset")?;
    let tokens_for_lp = tokens_for_amount(lp_asset, decimals, price_per_token)?;

    let keep = BPS_DENOMINATOR - slippage_bps;
    let min_tokens_for_lp = apply_bps(tokens_for_lp, keep, "min liquidity tokens")?;
    let min_asset_for_lp = apply_bps(lp_asset, keep, "min liquidity asset")?;

    Ok(LiquidityPlan {
        fee_amount,
        net_after_fee,
        lp_asset,
        tokens_for_lp,
        min_tokens_for_lp,
        min_asset_for_lp,
        owner_release: net_after_fee - lp_asset,
    })
}

/// The largest total raise whose sold tokens plus liquidity tokens are
/// guaranteed to fit in `tokens_for_sale`, whatever fee the chain charges.
///
/// ```text
/// sold + lp <= raised * 10^decimals / price * (10000 + lp_bps) / 10000
/// max_raise  = tokens_for_sale * price / 10^decimals * 10000 / (10000 + lp_bps)
/// ```
///
/// The fee only shrinks the liquidity side, so zero fee is the worst case.
/// Both divisions truncate, which keeps the bound on the safe side.
pub fn max_raise(
    tokens_for_sale: Amount,
    liquidity_bps: u16,
    decimals: u8,
    price_per_token: Amount,
) -> Result<Amount, ValidationError> {
    check_bps("liquidity_bps", liquidity_bps)?;
    if price_per_token == 0 {
        return Err(ValidationError::ZeroPrice);
    }
    let value = mul_div(tokens_for_sale, price_per_token, pow10(decimals)?, "sale value")?;
    mul_div(
        value,
        u128::from(BPS_DENOMINATOR),
        u128::from(BPS_DENOMINATOR) + u128::from(liquidity_bps),
        "max raise",
    )
}

pub(crate) fn check_bps(field: &'static str, value: u16) -> Result<(), ValidationError> {
    if value > BPS_DENOMINATOR {
        return Err(ValidationError::BpsOutOfRange { field, value });
    }
    Ok(())
}
