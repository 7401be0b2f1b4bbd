use presale_types::{Amount, BPS_DENOMINATOR};

use crate::error::ValidationError;

/// Largest supported token decimals. `10^36` still leaves headroom in u128.
pub const MAX_DECIMALS: u8 = 36;

/// `floor(a * b / d)` with a 256-bit intermediate product.
///
/// Fails only when `d` is zero or the quotient itself does not fit in u128.
pub fn mul_div(a: u128, b: u128, d: u128, what: &'static str) -> Result<u128, ValidationError> {
    if d == 0 {
        return Err(ValidationError::DivisionByZero(what));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / d);
    }
    let (hi, lo) = mul_wide(a, b);
    div_wide(hi, lo, d).ok_or(ValidationError::ArithmeticOverflow(what))
}

/// `10^decimals`.
pub fn pow10(decimals: u8) -> Result<u128, ValidationError> {
    if decimals > MAX_DECIMALS {
        return Err(ValidationError::InvalidDecimals(decimals));
    }
    10u128
        .checked_pow(u32::from(decimals))
        .ok_or(ValidationError::InvalidDecimals(decimals))
}

/// `floor(amount * bps / 10000)`.
pub fn apply_bps(amount: Amount, bps: u16, what: &'static str) -> Result<Amount, ValidationError> {
    mul_div(
        amount,
        u128::from(bps),
        u128::from(BPS_DENOMINATOR),
        what,
    )
}

/// Whole-unit price conversion: `floor(amount * 10^decimals / price)`.
pub fn tokens_for_amount(
    amount: Amount,
    decimals: u8,
    price_per_token: Amount,
) -> Result<Amount, ValidationError> {
    if price_per_token == 0 {
        return Err(ValidationError::ZeroPrice);
    }
    mul_div(amount, pow10(decimals)?, price_per_token, "token quantity")
}

/// Full 256-bit product as (high, low) halves.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    // Each term is < 2^64, so the sum cannot overflow.
    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let lo = (ll & MASK) | ((mid & MASK) << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// `(hi * 2^128 + lo) / d`, or `None` if the quotient needs more than 128 bits.
fn div_wide(hi: u128, lo: u128, d: u128) -> Option<u128> {
    if hi >= d {
        return None;
    }
    let mut rem = hi;
    let mut quotient = 0u128;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quotient |= 1;
        }
    }
    Some(quotient)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ETH: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn small_products_take_fast_path() {
        assert_eq!(mul_div(7, 3, 2, "t").unwrap(), 10);
        assert_eq!(mul_div(0, u128::MAX, 5, "t").unwrap(), 0);
    }

    #[test]
    fn wide_product_divides_exactly() {
        // (2^127) * 4 / 8 = 2^126
        assert_eq!(mul_div(1 << 127, 4, 8, "t").unwrap(), 1 << 126);
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX, "t").unwrap(), u128::MAX);
    }

    #[test]
    fn quotient_overflow_is_reported() {
        assert_eq!(
            mul_div(u128::MAX, 2, 1, "t"),
            Err(ValidationError::ArithmeticOverflow("t"))
        );
    }

    #[test]
    fn zero_divisor_is_reported() {
        assert_eq!(mul_div(1, 1, 0, "t"), Err(ValidationError::DivisionByZero("t")));
    }

    #[test]
    fn tokens_truncate() {
        // 0.6 ETH at 0.0001 ETH per token = 6000 tokens
        let price = 100_000_000_000_000;
        assert_eq!(
            tokens_for_amount(6 * ETH / 10, 18, price).unwrap(),
            6_000 * ETH
        );
        // 1 wei short of a whole base unit still truncates down
        assert_eq!(tokens_for_amount(2, 0, 3).unwrap(), 0);
    }

    #[test]
    fn huge_raise_does_not_overflow() {
        // 10^38 wei times 10^18 exceeds u128, the quotient does not.
        let amount = 100 * ETH * ETH;
        let price = ETH;
        assert_eq!(tokens_for_amount(amount, 18, price).unwrap(), amount);
    }

    #[test]
    fn decimals_are_bounded() {
        assert_eq!(pow10(18).unwrap(), ETH);
        assert_eq!(pow10(37), Err(ValidationError::InvalidDecimals(37)));
    }

    #[test]
    fn bps_math() {
        assert_eq!(apply_bps(1_100, 200, "fee").unwrap(), 22);
        assert_eq!(apply_bps(999, 10_000, "all").unwrap(), 999);
        assert_eq!(apply_bps(999, 0, "none").unwrap(), 0);
    }

    proptest! {
        #[test]
        fn matches_checked_math_when_it_fits(a in 0u128..u64::MAX as u128, b in 0u128..u64::MAX as u128, d in 1u128..u64::MAX as u128) {
            prop_assert_eq!(mul_div(a, b, d, "p").unwrap(), a * b / d);
        }

        #[test]
        fn wide_path_agrees_with_split_division(a in any::<u128>(), b in 1u128..1_000_000) {
            // a * b / b == a whenever the quotient fits.
            prop_assert_eq!(mul_div(a, b, b, "p").unwrap(), a);
        }
    }
}
