//! Order book reconciler for snapshot-only exchanges
//!
//! Some exchanges push the full visible book on every update. The reconciler
//! keeps the previous snapshot per subscription key and diffs it against the
//! new one so consumers only ever see changed levels. Two book channels on
//! the same symbol (different depth or precision) never share a cache entry.
//!
//! Diff rules, applied to each side independently:
//! 1. Price in both, amount differs: emit the new level
//! 2. Price only in new: emit the new level
//! 3. Price only in old: emit a removal (amount 0, count 0)
//! 4. Price in both, same amount: omitted
//!
//! Output levels are sorted by ascending price within each side.

use std::collections::BTreeMap;

use tracing::debug;
use types::market::{OrderBookDelta, OrderBookSnapshot, PriceLevel};
use types::numeric::Price;

/// Diff one book side. Output is in ascending price order.
pub fn diff_side(
    before: &BTreeMap<Price, PriceLevel>,
    after: &BTreeMap<Price, PriceLevel>,
) -> Vec<PriceLevel> {
    let mut changes = Vec::new();

    // Levels that existed before: modified or removed
    for (price, old_level) in before {
        match after.get(price) {
            Some(new_level) if new_level.amount != old_level.amount => changes.push(*new_level),
            Some(_) => {}
            None => changes.push(PriceLevel::removal(*price)),
        }
    }

    // Levels that are new
    for (price, new_level) in after {
        if !before.contains_key(price) {
            changes.push(*new_level);
        }
    }

    changes.sort_by(|a, b| a.price.cmp(&b.price)); // Deterministic ordering
    changes
}

/// Snapshot cache holding exactly one generation of history per channel.
#[derive(Debug, Default)]
pub struct OrderBookReconciler {
    books: BTreeMap<String, OrderBookSnapshot>,
}

impl OrderBookReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `snapshot` against the book cached under `key`, then replace
    /// the cache with it.
    ///
    /// With no cached book every level in the snapshot is reported as added.
    pub fn reconcile(&mut self, key: &str, snapshot: OrderBookSnapshot) -> OrderBookDelta {
        let empty = BTreeMap::new();
        let (old_asks, old_bids) = match self.books.get(key) {
            Some(previous) => (&previous.asks, &previous.bids),
            None => (&empty, &empty),
        };

        let delta = OrderBookDelta {
            symbol: snapshot.symbol.clone(),
            asks: diff_side(old_asks, &snapshot.asks),
            bids: diff_side(old_bids, &snapshot.bids),
            checksum: None,
        };

        debug!(
            key = %key,
            symbol = %snapshot.symbol,
            changed_asks = delta.asks.len(),
            changed_bids = delta.bids.len(),
            "order book reconciled"
        );

        self.books.insert(key.to_string(), snapshot);
        delta
    }

    /// Cached snapshot for a channel key.
    pub fn book(&self, key: &str) -> Option<&OrderBookSnapshot> {
        self.books.get(key)
    }

    /// Drop the cached book for one channel.
    pub fn forget(&mut self, key: &str) -> bool {
        self.books.remove(key).is_some()
    }

    /// Drop every cached book.
    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use types::ids::Symbol;
    use types::numeric::Amount;

    const KEY: &str = "market.btcusdt.depth.step0";

    fn level(price: &str, amount: &str) -> PriceLevel {
        PriceLevel::new(
            Price::from_str(price).unwrap(),
            Amount::from_str(amount).unwrap(),
        )
    }

    fn snapshot(asks: &[(&str, &str)], bids: &[(&str, &str)]) -> OrderBookSnapshot {
        OrderBookSnapshot::from_levels(
            Symbol::new("btcusdt"),
            asks.iter().map(|(p, a)| level(p, a)),
            bids.iter().map(|(p, a)| level(p, a)),
        )
    }

    #[test]
    fn test_first_snapshot_is_all_added() {
        let mut rec = OrderBookReconciler::new();
        let delta = rec.reconcile(KEY, snapshot(&[("101", "2"), ("102", "1")], &[("100", "1")]));
        assert_eq!(delta.asks.len(), 2);
        assert_eq!(delta.bids, vec![level("100", "1")]);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_modified_added_removed() {
        let mut rec = OrderBookReconciler::new();
        rec.reconcile(KEY, snapshot(&[("101", "2"), ("103", "4")], &[("100", "1")]));
        let delta = rec.reconcile(KEY, snapshot(&[("101", "2"), ("102", "1")], &[("100", "2")]));

        assert_eq!(delta.bids, vec![level("100", "2")]);
        assert_eq!(
            delta.asks,
            vec![
                level("102", "1"),
                PriceLevel::removal(Price::from_u64(103)),
            ]
        );
    }

    #[test]
    fn test_removal_has_zero_count() {
        let mut rec = OrderBookReconciler::new();
        rec.reconcile(KEY, snapshot(&[("101", "2")], &[]));
        let delta = rec.reconcile(KEY, snapshot(&[], &[]));
        assert_eq!(delta.asks.len(), 1);
        assert!(delta.asks[0].amount.is_zero());
        assert_eq!(delta.asks[0].count, Some(0));
    }

    #[test]
    fn test_equal_value_different_scale_is_unchanged() {
        let mut rec = OrderBookReconciler::new();
        rec.reconcile(KEY, snapshot(&[("101.0", "2.50")], &[]));
        let delta = rec.reconcile(KEY, snapshot(&[("101", "2.5")], &[]));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut rec = OrderBookReconciler::new();
        rec.reconcile(KEY, snapshot(&[("101", "2")], &[]));
        let other = OrderBookSnapshot::from_levels(
            Symbol::new("ethusdt"),
            vec![level("10", "1")],
            vec![],
        );
        let delta = rec.reconcile("market.ethusdt.depth.step0", other);
        assert_eq!(delta.asks, vec![level("10", "1")]);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_channels_on_one_symbol_are_independent() {
        const COARSE: &str = "market.btcusdt.depth.step1";
        let mut rec = OrderBookReconciler::new();
        let fine = || snapshot(&[("100.1", "1")], &[]);
        let coarse = || snapshot(&[("100", "1")], &[]);

        rec.reconcile(KEY, fine());
        rec.reconcile(COARSE, coarse());
        assert!(rec.reconcile(KEY, fine()).is_empty());
        assert!(rec.reconcile(COARSE, coarse()).is_empty());

        assert!(rec.forget(COARSE));
        assert_eq!(rec.book(KEY), Some(&fine()));
        assert!(rec.reconcile(KEY, fine()).is_empty());
    }

    #[test]
    fn test_forget_and_clear() {
        let mut rec = OrderBookReconciler::new();
        rec.reconcile(KEY, snapshot(&[("101", "2")], &[]));
        assert!(rec.forget(KEY));
        assert!(!rec.forget(KEY));
        let delta = rec.reconcile(KEY, snapshot(&[("101", "2")], &[]));
        assert_eq!(delta.asks.len(), 1);
        rec.clear();
        assert!(rec.is_empty());
    }
}
