//! Identifier types for exchanges and instruments
//!
//! Symbols are kept exactly as the caller supplied them when subscribing
//! (e.g. "btc_usdt", "BTCUSD", "XBTUSD"). Each exchange profile derives its
//! own wire instrument name from the symbol; canonical events always carry
//! the caller's spelling so consumers can correlate them with their requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::IdError;

/// Instrument symbol as requested by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a `BASE_QUOTE` style symbol into its two assets.
    ///
    /// Returns `None` when the symbol carries no `_`, `-` or `/` separator.
    pub fn split_pair(&self) -> Option<(&str, &str)> {
        self.0.split_once(['_', '-', '/'])
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Supported exchange streaming endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    /// Bitfinex WebSocket v1
    Bitfinex,
    /// BitMEX realtime API
    Bitmex,
    /// Gate.io WebSocket v3
    Gateio,
    /// Huobi Pro market WebSocket (gzip frames)
    Huobipro,
    /// OKX WebSocket v5 public
    Okex,
    /// OKEx WebSocket v3 (raw-deflate frames)
    Okex3,
    /// ZB WebSocket
    Zb,
}

impl ExchangeId {
    /// All supported exchanges, in declaration order.
    pub const ALL: [ExchangeId; 7] = [
        ExchangeId::Bitfinex,
        ExchangeId::Bitmex,
        ExchangeId::Gateio,
        ExchangeId::Huobipro,
        ExchangeId::Okex,
        ExchangeId::Okex3,
        ExchangeId::Zb,
    ];

    /// Lowercase name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Bitfinex => "bitfinex",
            ExchangeId::Bitmex => "bitmex",
            ExchangeId::Gateio => "gateio",
            ExchangeId::Huobipro => "huobipro",
            ExchangeId::Okex => "okex",
            ExchangeId::Okex3 => "okex3",
            ExchangeId::Zb => "zb",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ExchangeId::ALL
            .into_iter()
            .find(|id| id.as_str() == lower)
            .ok_or_else(|| IdError::UnknownExchange(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_keeps_caller_spelling() {
        let symbol = Symbol::new("btc_usdt");
        assert_eq!(symbol.as_str(), "btc_usdt");
        assert_eq!(symbol.to_string(), "btc_usdt");
    }

    #[test]
    fn test_symbol_split_pair() {
        assert_eq!(Symbol::new("btc_usdt").split_pair(), Some(("btc", "usdt")));
        assert_eq!(Symbol::new("BTC-USDT").split_pair(), Some(("BTC", "USDT")));
        assert_eq!(Symbol::new("BTCUSD").split_pair(), None);
    }

    #[test]
    fn test_exchange_id_parse() {
        assert_eq!("okex".parse::<ExchangeId>().unwrap(), ExchangeId::Okex);
        assert_eq!("HuobiPro".parse::<ExchangeId>().unwrap(), ExchangeId::Huobipro);
        assert!(matches!(
            "binance".parse::<ExchangeId>(),
            Err(IdError::UnknownExchange(name)) if name == "binance"
        ));
    }

    #[test]
    fn test_exchange_id_serialization() {
        let json = serde_json::to_string(&ExchangeId::Okex3).unwrap();
        assert_eq!(json, "\"okex3\"");

        let deserialized: ExchangeId = serde_json::from_str("\"gateio\"").unwrap();
        assert_eq!(deserialized, ExchangeId::Gateio);
    }
}
