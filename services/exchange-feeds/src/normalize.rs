//! Event normalization
//!
//! Routes a decoded data message to its subscription and maps it into the
//! canonical model according to the subscription kind. Snapshot-only order
//! books pass through the reconciler so consumers only ever see deltas.

use serde_json::Value;
use tracing::{debug, trace};
use types::ids::Symbol;
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta};

use crate::error::FeedError;
use crate::exchanges::{BookPayload, ExchangeProfile};
use crate::reconcile::OrderBookReconciler;
use crate::registry::{ChannelKind, ChannelRegistry};

/// Canonical output of one data message.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    OrderBook(Symbol, OrderBookDelta),
    Trades(Symbol, Vec<NormalizedTrade>),
    Ticker(Symbol, NormalizedTicker),
}

/// Normalize a data message.
///
/// Messages the profile cannot route yield no events. A route with no
/// registered subscription is reported as [`FeedError::UnroutableMessage`]
/// so the caller can decide how loudly to drop it.
pub fn normalize(
    profile: &dyn ExchangeProfile,
    msg: &Value,
    registry: &mut ChannelRegistry,
    reconciler: &mut OrderBookReconciler,
) -> Result<Vec<CanonicalEvent>, FeedError> {
    let Some(route) = profile.route(msg) else {
        trace!(exchange = %profile.exchange(), "message carries no route");
        return Ok(Vec::new());
    };
    let Some(sub) = registry.resolve_mut(&route) else {
        return Err(FeedError::UnroutableMessage(route));
    };

    match sub.kind {
        ChannelKind::OrderBook => {
            let delta = match profile.parse_book(msg, sub)? {
                BookPayload::Delta(delta) => delta,
                BookPayload::Snapshot(snapshot) => reconciler.reconcile(&sub.key, snapshot),
                BookPayload::Nothing => return Ok(Vec::new()),
            };
            if delta.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![CanonicalEvent::OrderBook(sub.symbol.clone(), delta)])
        }
        ChannelKind::Trade => {
            let batch = profile.parse_trades(msg, sub)?;
            let first = !sub.primed;
            sub.primed = true;
            if batch.history || (first && profile.first_trade_batch_is_snapshot()) {
                debug!(key = %sub.key, "trade history batch suppressed");
                return Ok(Vec::new());
            }
            if batch.trades.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![CanonicalEvent::Trades(sub.symbol.clone(), batch.trades)])
        }
        ChannelKind::Ticker => Ok(profile
            .parse_ticker(msg, sub)?
            .into_iter()
            .map(|ticker| CanonicalEvent::Ticker(sub.symbol.clone(), ticker))
            .collect()),
        ChannelKind::Auth => {
            trace!(key = %sub.key, "private channel message not normalized");
            Ok(Vec::new())
        }
    }
}
