//! Timestamp conversion to Unix milliseconds
//!
//! Exchanges report trade times as integer seconds, fractional seconds,
//! integer milliseconds, or ISO-8601 strings. All canonical records carry
//! Unix milliseconds.

use chrono::DateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::NumericError;
use crate::numeric::decimal_from_value;

/// Unit of a numeric epoch timestamp on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Seconds,
    Millis,
}

/// Convert a numeric epoch value (JSON number or numeric string) to millis.
///
/// Fractional input is truncated toward zero after scaling.
pub fn epoch_millis(value: &Value, unit: EpochUnit) -> Result<i64, NumericError> {
    let raw = decimal_from_value(value)
        .map_err(|_| NumericError::InvalidTimestamp(value.to_string()))?;
    let scaled = match unit {
        EpochUnit::Seconds => raw
            .checked_mul(Decimal::from(1000))
            .ok_or_else(|| NumericError::InvalidTimestamp(value.to_string()))?,
        EpochUnit::Millis => raw,
    };
    scaled
        .trunc()
        .to_i64()
        .ok_or_else(|| NumericError::InvalidTimestamp(value.to_string()))
}

/// Parse an RFC 3339 / ISO-8601 timestamp such as `2019-07-24T05:17:33.123Z`.
pub fn rfc3339_millis(text: &str) -> Result<i64, NumericError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| NumericError::InvalidTimestamp(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(
            epoch_millis(&json!(1563945453), EpochUnit::Seconds).unwrap(),
            1_563_945_453_000
        );
    }

    #[test]
    fn test_fractional_seconds_to_millis() {
        assert_eq!(
            epoch_millis(&json!("1563945453.1234"), EpochUnit::Seconds).unwrap(),
            1_563_945_453_123
        );
    }

    #[test]
    fn test_millis_passthrough() {
        assert_eq!(
            epoch_millis(&json!("1597026383085"), EpochUnit::Millis).unwrap(),
            1_597_026_383_085
        );
    }

    #[test]
    fn test_invalid_epoch() {
        assert!(matches!(
            epoch_millis(&json!("soon"), EpochUnit::Millis),
            Err(NumericError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_rfc3339() {
        assert_eq!(
            rfc3339_millis("2019-07-24T05:17:33.123Z").unwrap(),
            1_563_945_453_123
        );
        assert!(rfc3339_millis("yesterday").is_err());
    }
}
