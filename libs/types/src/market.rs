//! Canonical market-data records
//!
//! Every exchange feed is normalized into these shapes regardless of the
//! wire protocol it arrived on. Book sides are keyed by `Price` in a
//! `BTreeMap` so iteration order is always ascending and deterministic.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::Symbol;
use crate::numeric::{Amount, Price};

/// Book side of a level or aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Side implied by a signed exchange amount: negative is Ask, otherwise Bid.
    pub fn from_sign(amount: Decimal) -> Side {
        if amount.is_sign_negative() && !amount.is_zero() {
            Side::Ask
        } else {
            Side::Bid
        }
    }
}

/// One price level of a book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    /// Total size resting at this price. Zero marks a removal.
    pub amount: Amount,
    /// Number of orders at this level, when the exchange reports it.
    pub count: Option<u32>,
}

impl PriceLevel {
    pub fn new(price: Price, amount: Amount) -> Self {
        Self {
            price,
            amount,
            count: None,
        }
    }

    pub fn with_count(price: Price, amount: Amount, count: u32) -> Self {
        Self {
            price,
            amount,
            count: Some(count),
        }
    }

    /// Removal marker for a price that disappeared from the book.
    pub fn removal(price: Price) -> Self {
        Self {
            price,
            amount: Amount::ZERO,
            count: Some(0),
        }
    }

    /// Whether this level tells the consumer to delete the price.
    pub fn is_removal(&self) -> bool {
        self.amount.is_zero() || self.count == Some(0)
    }
}

/// Full order book state for one symbol as last pushed by the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    pub asks: BTreeMap<Price, PriceLevel>,
    pub bids: BTreeMap<Price, PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
        }
    }

    /// Build a snapshot from level lists. A repeated price keeps the last level.
    pub fn from_levels(
        symbol: Symbol,
        asks: impl IntoIterator<Item = PriceLevel>,
        bids: impl IntoIterator<Item = PriceLevel>,
    ) -> Self {
        Self {
            symbol,
            asks: asks.into_iter().map(|l| (l.price, l)).collect(),
            bids: bids.into_iter().map(|l| (l.price, l)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

/// Changed levels of one book update.
///
/// A level absent from both lists is unchanged. Each list is ordered by
/// ascending price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub symbol: Symbol,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    /// Exchange-computed checksum of the book after this update, when the
    /// exchange sends one. Passed through unverified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<i64>,
}

impl OrderBookDelta {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            asks: Vec::new(),
            bids: Vec::new(),
            checksum: None,
        }
    }

    /// Append a level to the list for `side`.
    pub fn push(&mut self, side: Side, level: PriceLevel) {
        match side {
            Side::Bid => self.bids.push(level),
            Side::Ask => self.asks.push(level),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Total number of changed levels across both sides.
    pub fn len(&self) -> usize {
        self.asks.len() + self.bids.len()
    }
}

/// Public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    pub symbol: Symbol,
    /// Exchange trade id or sequence number, as text.
    pub id: String,
    pub price: Price,
    /// Always non-negative; direction lives in `side`.
    pub amount: Amount,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub side: Side,
}

/// Best-quote and 24h statistics. Unreported fields are `None`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTicker {
    pub symbol: Symbol,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub last: Option<Price>,
    pub volume: Option<Amount>,
    pub high: Option<Price>,
    pub low: Option<Price>,
}

impl NormalizedTicker {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn level(price: u64, amount: &str) -> PriceLevel {
        PriceLevel::new(Price::from_u64(price), Amount::from_str(amount).unwrap())
    }

    #[test]
    fn test_side_from_sign() {
        assert_eq!(Side::from_sign(Decimal::from(-3)), Side::Ask);
        assert_eq!(Side::from_sign(Decimal::from(3)), Side::Bid);
        assert_eq!(Side::from_sign(Decimal::ZERO), Side::Bid);
    }

    #[test]
    fn test_removal_level() {
        let removal = PriceLevel::removal(Price::from_u64(101));
        assert!(removal.is_removal());
        assert_eq!(removal.count, Some(0));
        assert!(!level(101, "2").is_removal());
        assert!(PriceLevel::with_count(Price::from_u64(1), Amount::from_str("1").unwrap(), 0)
            .is_removal());
    }

    #[test]
    fn test_snapshot_from_levels_sorted() {
        let snap = OrderBookSnapshot::from_levels(
            Symbol::new("btc_usdt"),
            vec![level(103, "1"), level(101, "2")],
            vec![level(99, "1"), level(100, "3")],
        );
        let ask_prices: Vec<_> = snap.asks.keys().copied().collect();
        assert_eq!(ask_prices, vec![Price::from_u64(101), Price::from_u64(103)]);
        assert_eq!(snap.bids.len(), 2);
        assert!(!snap.is_empty());
    }

    #[test]
    fn test_snapshot_duplicate_price_keeps_last() {
        let snap = OrderBookSnapshot::from_levels(
            Symbol::new("x"),
            vec![level(101, "1"), level(101, "5")],
            vec![],
        );
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.asks[&Price::from_u64(101)].amount, Amount::from_str("5").unwrap());
    }

    #[test]
    fn test_delta_push_and_len() {
        let mut delta = OrderBookDelta::new(Symbol::new("x"));
        assert!(delta.is_empty());
        delta.push(Side::Ask, level(101, "1"));
        delta.push(Side::Bid, level(100, "1"));
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.asks.len(), 1);
        assert_eq!(delta.checksum, None);
        let json = serde_json::to_value(&delta).unwrap();
        assert!(json.get("checksum").is_none());
    }

    #[test]
    fn test_ticker_defaults_absent() {
        let ticker = NormalizedTicker::new(Symbol::new("BTCUSD"));
        assert!(ticker.bid.is_none());
        assert!(ticker.volume.is_none());
    }

    #[test]
    fn test_trade_serialization() {
        let trade = NormalizedTrade {
            symbol: Symbol::new("btc_usdt"),
            id: "42".to_string(),
            price: Price::from_str("6500.5").unwrap(),
            amount: Amount::from_str("0.25").unwrap(),
            timestamp: 1_563_945_453_000,
            side: Side::Ask,
        };
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["side"], "ask");
        assert_eq!(json["price"], "6500.5");
    }
}
