//! Fixed-point decimal types for prices and amounts
//!
//! Uses rust_decimal for deterministic comparison (no floating-point errors).
//! Values are parsed from the exchange's own textual representation so two
//! payloads carrying the same digits always compare equal, and a level is
//! never reported as modified because of a binary rounding artifact.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NumericError;

/// Parse a decimal from text, accepting plain and scientific notation.
pub fn parse_decimal(text: &str) -> Result<Decimal, NumericError> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| NumericError::InvalidDecimal(text.to_string()))
}

/// Parse a decimal from a JSON string or number.
///
/// JSON numbers are read through their literal text, which keeps the
/// exchange's digits intact when `serde_json` preserves number text.
pub fn decimal_from_value(value: &Value) -> Result<Decimal, NumericError> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        other => Err(NumericError::InvalidDecimal(other.to_string())),
    }
}

/// Price of a level or trade.
///
/// Ordering and equality are exact decimal value comparisons: "100.0" and
/// "100.00" are the same price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Create a price, rejecting negative values.
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(NumericError::NegativePrice(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Create a price from an integer value.
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a price from a JSON string or number.
    pub fn from_value(value: &Value) -> Result<Self, NumericError> {
        Self::try_new(decimal_from_value(value)?)
    }

    /// Inner decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-negative size of a level, trade, or traded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount, used as the removal marker on book levels.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create an amount, rejecting negative values.
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(NumericError::NegativeAmount(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Absolute value of a signed exchange amount.
    pub fn from_signed(value: Decimal) -> Self {
        Self(value.abs())
    }

    /// Parse an amount from a JSON string or number.
    pub fn from_value(value: &Value) -> Result<Self, NumericError> {
        Self::try_new(decimal_from_value(value)?)
    }

    /// Inner decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Amount {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse an order count from a JSON string or integer.
pub fn count_from_value(value: &Value) -> Result<u32, NumericError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| NumericError::InvalidCount(value.to_string()))
}
