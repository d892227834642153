//! Normalized currency amounts
//!
//! Engines report amounts as big integers in a currency's base unit, usually as
//! decimal strings (account model) or plain integers (UTXO model). Both are
//! normalized into [`Amount`] before anything is stored or emitted.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::network::Currency;
use crate::errors::DecodeError;

/// An unsigned amount of a currency, held in base units
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    value: U256,
    currency: String,
    decimals: u8,
}

impl Amount {
    /// Create an amount from base units
    pub fn from_base_units(value: U256, currency: &Currency) -> Self {
        Self {
            value,
            currency: currency.code.clone(),
            decimals: currency.default_unit.decimals,
        }
    }

    pub fn from_u64(value: u64, currency: &Currency) -> Self {
        Self::from_base_units(U256::from(value), currency)
    }

    pub fn zero(currency: &Currency) -> Self {
        Self::from_base_units(U256::zero(), currency)
    }

    /// Parse a big-integer string in base units
    ///
    /// Accepts decimal digits or `0x`-prefixed hex, the two forms engines and
    /// query services hand back.
    pub fn parse_base_units(raw: &str, currency: &Currency) -> Result<Self, DecodeError> {
        parse_u256(raw).map(|value| Self::from_base_units(value, currency))
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn currency_code(&self) -> &str {
        &self.currency
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Add two amounts of the same currency
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        if self.currency != other.currency {
            return None;
        }
        self.value.checked_add(other.value).map(|value| Amount {
            value,
            currency: self.currency.clone(),
            decimals: self.decimals,
        })
    }

    /// Subtract an amount of the same currency; `None` on underflow
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.currency != other.currency {
            return None;
        }
        self.value.checked_sub(other.value).map(|value| Amount {
            value,
            currency: self.currency.clone(),
            decimals: self.decimals,
        })
    }

    /// Base-unit value as a decimal string
    pub fn to_base_string(&self) -> String {
        self.value.to_string()
    }

    /// Value in the currency's default unit, without trailing zeros
    pub fn to_decimal_string(&self) -> String {
        let digits = self.value.to_string();
        let decimals = self.decimals as usize;
        if decimals == 0 {
            return digits;
        }

        let padded = if digits.len() <= decimals {
            format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
        } else {
            digits
        };
        let (whole, fraction) = padded.split_at(padded.len() - decimals);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            whole.to_string()
        } else {
            format!("{whole}.{fraction}")
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

/// Parse a decimal or `0x`-hex big integer
pub fn parse_u256(raw: &str) -> Result<U256, DecodeError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| DecodeError::InvalidAmount {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty value"));
    }

    if let Some(hex_digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex_digits.is_empty() {
            return Err(invalid("empty hex value"));
        }
        return U256::from_str_radix(hex_digits, 16).map_err(|e| invalid(&format!("{e:?}")));
    }

    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("not a non-negative integer"));
    }
    U256::from_dec_str(trimmed).map_err(|e| invalid(&format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::network::Network;

    fn btc() -> Currency {
        Network::bitcoin(true).native().cloned().unwrap()
    }

    fn eth() -> Currency {
        Network::ethereum(true).native().cloned().unwrap()
    }

    #[test]
    fn test_parse_decimal_and_hex() {
        let decimal = Amount::parse_base_units("1000000000000000000", &eth()).unwrap();
        let hex = Amount::parse_base_units("0xde0b6b3a7640000", &eth()).unwrap();
        assert_eq!(decimal, hex);
        assert_eq!(decimal.to_decimal_string(), "1");
        assert_eq!(decimal.to_string(), "1 eth");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Amount::parse_base_units("", &btc()),
            Err(DecodeError::InvalidAmount { .. })
        ));
        assert!(Amount::parse_base_units("-5", &btc()).is_err());
        assert!(Amount::parse_base_units("12.5", &btc()).is_err());
        assert!(Amount::parse_base_units("0x", &btc()).is_err());
        assert!(Amount::parse_base_units("0xzz", &btc()).is_err());
    }

    #[test]
    fn test_decimal_formatting() {
        assert_eq!(Amount::from_u64(150_000_000, &btc()).to_decimal_string(), "1.5");
        assert_eq!(Amount::from_u64(1, &btc()).to_decimal_string(), "0.00000001");
        assert_eq!(Amount::from_u64(0, &btc()).to_decimal_string(), "0");
        assert_eq!(Amount::from_u64(2_100_000_000, &btc()).to_decimal_string(), "21");
    }

    #[test]
    fn test_checked_arithmetic_requires_same_currency() {
        let a = Amount::from_u64(10, &btc());
        let b = Amount::from_u64(4, &btc());
        assert_eq!(a.checked_sub(&b), Some(Amount::from_u64(6, &btc())));
        assert_eq!(b.checked_sub(&a), None);
        assert_eq!(a.checked_add(&Amount::from_u64(1, &eth())), None);
    }
}
