//! Fixed-point amount parsing for native value and fee fields

use crate::error::AmountError;
use ethers::types::U256;
use ethers::utils::parse_units;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal exponent of the native currency (wei per ether)
pub const NATIVE_DECIMALS: u32 = 18;

/// Decimal exponent of fee values expressed in gwei
pub const GWEI_DECIMALS: u32 = 9;

/// An amount as written in configuration: either a JSON string or a JSON number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecimalAmount {
    Text(String),
    Number(serde_json::Number),
}

impl DecimalAmount {
    /// Convert to minimal units with the given decimal exponent
    pub fn to_units(&self, decimals: u32) -> Result<U256, AmountError> {
        match self {
            DecimalAmount::Text(text) => parse_amount(text, decimals),
            // serde_json prints small and large floats in exponent form
            DecimalAmount::Number(number) => {
                let text = number.to_string();
                if text.starts_with('-') {
                    return Err(AmountError::Negative(text));
                }
                let plain = expand_exponent(&text).ok_or_else(|| AmountError::Malformed(text.clone()))?;
                parse_amount(&plain, decimals).map_err(|e| match e {
                    AmountError::Malformed(_) => AmountError::Malformed(text),
                    other => other,
                })
            }
        }
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecimalAmount::Text(text) => write!(f, "{}", text),
            DecimalAmount::Number(number) => write!(f, "{}", number),
        }
    }
}

impl From<&str> for DecimalAmount {
    fn from(value: &str) -> Self {
        DecimalAmount::Text(value.to_string())
    }
}

impl From<u64> for DecimalAmount {
    fn from(value: u64) -> Self {
        DecimalAmount::Number(value.into())
    }
}

/// Parse a non-negative decimal string into minimal units.
///
/// Trailing fractional zeros are accepted; any other digit beyond `decimals`
/// places is rejected instead of being rounded away.
pub fn parse_amount(value: &str, decimals: u32) -> Result<U256, AmountError> {
    let cleaned = value.trim().replace('_', "");

    if cleaned.starts_with('-') {
        return Err(AmountError::Negative(value.to_string()));
    }

    let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(AmountError::Malformed(value.to_string()));
    }

    let significant = fraction.trim_end_matches('0');
    if significant.len() > decimals as usize {
        return Err(AmountError::ExcessPrecision {
            value: value.to_string(),
            decimals,
        });
    }

    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if significant.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, significant)
    };

    parse_units(normalized, decimals)
        .map(U256::from)
        .map_err(|_| AmountError::Overflow(value.to_string()))
}

/// Rewrite `1.5e-7` style numbers as plain decimals; others pass through
fn expand_exponent(text: &str) -> Option<String> {
    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Some(text.to_string());
    };
    let exponent: i32 = exponent.trim_start_matches('+').parse().ok()?;
    if exponent.unsigned_abs() > 96 {
        return None;
    }

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{whole}{fraction}");
    let point = whole.len() as i32 + exponent;

    Some(if point <= 0 {
        format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
    } else if point as usize >= digits.len() {
        format!("{}{}", digits, "0".repeat(point as usize - digits.len()))
    } else {
        let (head, tail) = digits.split_at(point as usize);
        format!("{head}.{tail}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_native_amount() {
        let wei = parse_amount("1.0", NATIVE_DECIMALS).unwrap();
        assert_eq!(wei, U256::exp10(18));

        let wei = parse_amount("0.05", NATIVE_DECIMALS).unwrap();
        assert_eq!(wei, U256::from(50_000_000_000_000_000u64));

        let wei = parse_amount(".5", NATIVE_DECIMALS).unwrap();
        assert_eq!(wei, U256::from(500_000_000_000_000_000u64));
    }

    #[test]
    fn test_parse_gwei_fees() {
        assert_eq!(parse_amount("2", GWEI_DECIMALS).unwrap(), U256::from(2_000_000_000u64));
        assert_eq!(parse_amount("50", GWEI_DECIMALS).unwrap(), U256::from(50_000_000_000u64));
        assert_eq!(parse_amount("1.5", GWEI_DECIMALS).unwrap(), U256::from(1_500_000_000u64));
    }

    #[test]
    fn test_rejects_excess_precision() {
        let err = parse_amount("0.0000000001", GWEI_DECIMALS).unwrap_err();
        assert_eq!(
            err,
            AmountError::ExcessPrecision {
                value: "0.0000000001".to_string(),
                decimals: 9
            }
        );

        // Trailing zeros carry no precision
        assert!(parse_amount("1.0000000000000", GWEI_DECIMALS).is_ok());
    }

    #[test]
    fn test_rejects_negative_and_malformed() {
        assert!(matches!(parse_amount("-1", NATIVE_DECIMALS), Err(AmountError::Negative(_))));
        assert!(matches!(parse_amount("abc", NATIVE_DECIMALS), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount("1e18", NATIVE_DECIMALS), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount("", NATIVE_DECIMALS), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount(".", NATIVE_DECIMALS), Err(AmountError::Malformed(_))));
    }

    #[test]
    fn test_decimal_amount_from_json() {
        let text: DecimalAmount = serde_json::from_str("\"0.1\"").unwrap();
        let number: DecimalAmount = serde_json::from_str("0.1").unwrap();

        assert_eq!(text.to_units(NATIVE_DECIMALS).unwrap(), number.to_units(NATIVE_DECIMALS).unwrap());
    }

    #[test]
    fn test_small_json_number_in_exponent_form() {
        let price: DecimalAmount = serde_json::from_str("0.0000001").unwrap();
        assert_eq!(price.to_units(NATIVE_DECIMALS).unwrap(), U256::from(100_000_000_000u64));

        let fee: DecimalAmount = serde_json::from_str("1.5e-3").unwrap();
        assert_eq!(fee.to_units(GWEI_DECIMALS).unwrap(), U256::from(1_500_000u64));

        let big: DecimalAmount = serde_json::from_str("2e21").unwrap();
        assert_eq!(big.to_units(0).unwrap(), U256::from(2_000_000_000_000_000_000_000u128));
    }
}
