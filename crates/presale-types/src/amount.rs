//! Token and raise-asset quantities.
//!
//! All quantities are integer base units. They are serialized as decimal
//! strings because u128 values do not survive JSON or TOML integers.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::error::TypeError;

/// A quantity in base units (wei-like for the raise asset, token base units
/// for the sale token).
pub type Amount = u128;

/// 10000 basis points = 100%.
pub const BPS_DENOMINATOR: u16 = 10_000;

/// Parse a decimal amount string. Underscore separators are accepted.
pub fn parse_amount(s: &str) -> Result<Amount, TypeError> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(TypeError::InvalidAmount(s.to_string()));
    }
    cleaned
        .parse::<u128>()
        .map_err(|_| TypeError::InvalidAmount(s.to_string()))
}

pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or a decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(v as Amount)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Amount::try_from(v).map_err(|_| E::custom(format!("amount must be non-negative, got {v}")))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        parse_amount(v).map_err(E::custom)
    }
}

/// `Option<Amount>` with the same string encoding.
pub mod opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Amount;

    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "super")] Amount);

    pub fn serialize<S>(value: &Option<Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Amount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "crate::amount")]
        value: Amount,
        #[serde(default, with = "crate::amount::opt")]
        cap: Option<Amount>,
    }

    #[test]
    fn parse_accepts_underscores() {
        assert_eq!(parse_amount("1_000_000").unwrap(), 1_000_000);
    }

    #[test]
    fn parse_rejects_negative_and_garbage() {
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("12eth").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn json_uses_strings_beyond_u64() {
        let holder = Holder {
            value: 600_000_000_000_000_000_000_000,
            cap: None,
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert!(json.contains("\"600000000000000000000000\""));
        let parsed: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, holder);
    }

    proptest! {
        #[test]
        fn parse_ignores_digit_grouping(value in any::<u128>(), group in 1usize..6) {
            let digits = value.to_string();
            let grouped: String = digits
                .chars()
                .enumerate()
                .flat_map(|(i, c)| {
                    let sep = (i > 0 && i % group == 0).then_some('_');
                    sep.into_iter().chain(std::iter::once(c))
                })
                .collect();
            prop_assert_eq!(parse_amount(&grouped).unwrap(), value);
        }
    }

    #[test]
    fn toml_integers_are_accepted() {
        let parsed: Holder = toml::from_str("value = 42\ncap = \"7\"").unwrap();
        assert_eq!(parsed.value, 42);
        assert_eq!(parsed.cap, Some(7));
    }
}
