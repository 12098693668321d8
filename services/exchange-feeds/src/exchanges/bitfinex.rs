//! Bitfinex WebSocket v1
//!
//! Channel data arrives as arrays prefixed by a numeric channel id that the
//! exchange assigns in its `subscribed` confirmation. The confirmation also
//! carries channel and pair, so the key is recomputed there and the id is
//! bound as an alias.
//!
//! Book rows are `[price, count, amount]` (or `[orderId, price, amount]` for
//! raw `R0` books); the sign of the amount selects the side and a zero count
//! deletes the level.

use serde_json::{json, Value};
use tracing::debug;
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, PriceLevel, Side};
use types::numeric::{count_from_value, decimal_from_value, Amount, Price};
use types::time::{epoch_millis, EpochUnit};

use super::{
    json_frame, opt_amount_at, opt_price_at, BookMode, BookPayload, Control, ExchangeProfile,
    TradeBatch,
};
use crate::decoder::Heartbeat;
use crate::error::DecodeError;
use crate::exchanges::AckRef;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://api.bitfinex.com/ws/";
const DEFAULT_PRECISION: &str = "P0";
const DEFAULT_LENGTH: u32 = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct Bitfinex;

fn channel_name(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::OrderBook => "book",
        ChannelKind::Trade => "trades",
        ChannelKind::Ticker => "ticker",
        ChannelKind::Auth => "auth",
    }
}

fn wire_pair(symbol: &Symbol) -> String {
    symbol
        .as_str()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | '/'))
        .collect::<String>()
        .to_uppercase()
}

/// Channel payload after the leading channel id.
fn payload(msg: &Value) -> Result<&[Value], DecodeError> {
    match msg.as_array() {
        Some(items) if !items.is_empty() => Ok(&items[1..]),
        _ => Err(DecodeError::Malformed("expected channel array".to_string())),
    }
}

fn book_level(row: &[Value], raw_orders: bool) -> Result<Option<(Side, PriceLevel)>, DecodeError> {
    if row.len() < 3 {
        return Err(DecodeError::Malformed(format!("short book row of {} items", row.len())));
    }
    let signed = decimal_from_value(&row[2])?;
    let side = Side::from_sign(signed);

    if raw_orders {
        // [orderId, price, amount]; price 0 removes an individual order
        let price = Price::from_value(&row[1])?;
        if price.as_decimal().is_zero() {
            return Ok(None);
        }
        return Ok(Some((side, PriceLevel::new(price, Amount::from_signed(signed)))));
    }

    let price = Price::from_value(&row[0])?;
    let count = count_from_value(&row[1])?;
    let level = if count == 0 {
        PriceLevel::removal(price)
    } else {
        PriceLevel::with_count(price, Amount::from_signed(signed), count)
    };
    Ok(Some((side, level)))
}

fn trade(
    sub: &ChannelSubscription,
    seq: &Value,
    timestamp: &Value,
    price: &Value,
    amount: &Value,
) -> Result<NormalizedTrade, DecodeError> {
    let signed = decimal_from_value(amount)?;
    let id = match seq {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(NormalizedTrade {
        symbol: sub.symbol.clone(),
        id,
        price: Price::from_value(price)?,
        amount: Amount::from_signed(signed),
        timestamp: epoch_millis(timestamp, EpochUnit::Seconds)?,
        side: Side::from_sign(signed),
    })
}

impl ExchangeProfile for Bitfinex {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitfinex
    }

    fn default_url(&self) -> &'static str {
        WS_URL
    }

    fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy::default()
    }

    fn book_mode(&self) -> BookMode {
        BookMode::Incremental
    }

    fn ping_frame(&self, _request_id: u64) -> Option<Frame> {
        Some(json_frame(json!({"event": "ping"})))
    }

    fn detect_heartbeat(&self, msg: &Value) -> Option<Heartbeat> {
        if msg.get("event").and_then(Value::as_str) == Some("pong") {
            return Some(Heartbeat::silent());
        }
        match msg.as_array() {
            Some(items) if items.get(1).and_then(Value::as_str) == Some("hb") => {
                Some(Heartbeat::silent())
            }
            _ => None,
        }
    }

    fn classify(&self, msg: &Value) -> Control {
        if msg.is_array() {
            return Control::Data;
        }
        match msg.get("event").and_then(Value::as_str) {
            Some("subscribed") => {
                let channel = msg.get("channel").and_then(Value::as_str);
                let pair = msg.get("pair").and_then(Value::as_str);
                let chan_id = msg.get("chanId").filter(|v| v.is_number());
                match (channel, pair, chan_id) {
                    (Some(channel), Some(pair), Some(chan_id)) => {
                        Control::Subscribed(AckRef::Bound {
                            alias: chan_id.to_string(),
                            key: format!("{channel}:{pair}"),
                        })
                    }
                    _ => Control::Other,
                }
            }
            Some("unsubscribed") => Control::Unsubscribed,
            Some("error") => Control::Rejected(msg.clone()),
            Some("auth") if msg.get("status").and_then(Value::as_str) != Some("OK") => {
                Control::Rejected(msg.clone())
            }
            _ => Control::Other,
        }
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, _params: &ChannelParams) -> String {
        format!("{}:{}", channel_name(kind), wire_pair(symbol))
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        let pair = wire_pair(&sub.symbol);
        let request = match sub.kind {
            ChannelKind::OrderBook => json!({
                "event": "subscribe",
                "channel": "book",
                "pair": pair,
                "prec": sub.params.precision.as_deref().unwrap_or(DEFAULT_PRECISION),
                "len": sub.params.depth.unwrap_or(DEFAULT_LENGTH).to_string(),
            }),
            ChannelKind::Trade | ChannelKind::Ticker => json!({
                "event": "subscribe",
                "channel": channel_name(sub.kind),
                "pair": pair,
            }),
            ChannelKind::Auth => return None,
        };
        Some(json_frame(request))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        // Only possible once the exchange has assigned a channel id
        let chan_id: u64 = sub.alias.as_deref()?.parse().ok()?;
        Some(json_frame(json!({"event": "unsubscribe", "chanId": chan_id})))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        msg.as_array()?.first().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let items = payload(msg)?;
        let raw_orders = sub.params.precision.as_deref() == Some("R0");
        let mut delta = OrderBookDelta::new(sub.symbol.clone());

        let rows: Vec<&[Value]> = match items.first() {
            // Initial snapshot: [[row], [row], ...]
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(Vec::as_slice)
                        .ok_or_else(|| DecodeError::Malformed(format!("book row {row}")))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => vec![items],
            None => return Ok(BookPayload::Nothing),
        };

        for row in rows {
            if let Some((side, level)) = book_level(row, raw_orders)? {
                delta.push(side, level);
            }
        }
        if delta.is_empty() {
            return Ok(BookPayload::Nothing);
        }
        Ok(BookPayload::Delta(delta))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        let items = payload(msg)?;
        match items.first() {
            Some(Value::Array(_)) => Ok(TradeBatch::history()),
            Some(Value::String(kind)) if kind == "te" => {
                if items.len() < 5 {
                    return Err(DecodeError::Malformed("short trade execution".to_string()));
                }
                let trade = trade(sub, &items[1], &items[2], &items[3], &items[4])?;
                Ok(TradeBatch::live(vec![trade]))
            }
            Some(other) => {
                debug!(kind = %other, "ignoring trade update");
                Ok(TradeBatch::default())
            }
            None => Ok(TradeBatch::default()),
        }
    }

    fn parse_ticker(
        &self,
        msg: &Value,
        sub: &ChannelSubscription,
    ) -> Result<Vec<NormalizedTicker>, DecodeError> {
        let items = payload(msg)?;
        if items.len() <= 9 {
            return Ok(Vec::new());
        }
        Ok(vec![NormalizedTicker {
            symbol: sub.symbol.clone(),
            bid: opt_price_at(items, 0)?,
            ask: opt_price_at(items, 2)?,
            last: opt_price_at(items, 6)?,
            volume: opt_amount_at(items, 7)?,
            high: opt_price_at(items, 8)?,
            low: opt_price_at(items, 9)?,
        }])
    }
}
