//! BitMEX realtime API
//!
//! Data messages are `{table, action, data: [rows]}` with `partial`,
//! `insert`, `update` and `delete` actions. The key is `table:symbol`, taken
//! from the confirmation's `subscribe` topic and from each row's `symbol`.

use serde_json::{json, Value};
use std::time::Duration;
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, PriceLevel, Side};
use types::numeric::{Amount, Price};
use types::time::rfc3339_millis;

use super::{
    array, field, id_field, json_frame, opt_price, str_field, AckRef, BookMode, BookPayload,
    Control, ExchangeProfile, TradeBatch,
};
use crate::decoder::Heartbeat;
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://www.bitmex.com/realtime";

#[derive(Debug, Clone, Copy, Default)]
pub struct Bitmex;

fn table(kind: ChannelKind, params: &ChannelParams) -> &'static str {
    match kind {
        ChannelKind::OrderBook if params.depth == Some(25) => "orderBookL2_25",
        ChannelKind::OrderBook => "orderBookL2",
        ChannelKind::Trade => "trade",
        ChannelKind::Ticker => "quote",
        ChannelKind::Auth => "execution",
    }
}

fn topic(sub: &ChannelSubscription) -> String {
    format!("{}:{}", table(sub.kind, &sub.params), sub.symbol.as_str().to_uppercase())
}

fn side(row: &Value) -> Result<Side, DecodeError> {
    match str_field(row, "side")? {
        "Buy" => Ok(Side::Bid),
        "Sell" => Ok(Side::Ask),
        other => Err(DecodeError::Malformed(format!("unknown side {other}"))),
    }
}

fn is_partial(msg: &Value) -> bool {
    msg.get("action").and_then(Value::as_str) == Some("partial")
}

impl ExchangeProfile for Bitmex {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitmex
    }

    fn default_url(&self) -> &'static str {
        WS_URL
    }

    fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy {
            ping_interval: Some(Duration::from_secs(5)),
            watchdog_interval: Some(Duration::from_secs(15)),
            deadline: Duration::from_secs(30),
        }
    }

    fn book_mode(&self) -> BookMode {
        BookMode::Incremental
    }

    fn ping_frame(&self, _request_id: u64) -> Option<Frame> {
        Some(Frame::text("ping"))
    }

    fn detect_heartbeat(&self, _msg: &Value) -> Option<Heartbeat> {
        None
    }

    fn classify(&self, msg: &Value) -> Control {
        if msg.get("table").is_some() {
            return Control::Data;
        }
        if msg.get("error").is_some() {
            return Control::Rejected(msg.clone());
        }
        if msg.get("success").and_then(Value::as_bool) == Some(true) {
            if let Some(topic) = msg.get("subscribe").and_then(Value::as_str) {
                return Control::Subscribed(AckRef::Key(topic.to_string()));
            }
            if msg.get("unsubscribe").is_some() {
                return Control::Unsubscribed;
            }
        }
        Control::Other
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, params: &ChannelParams) -> String {
        format!("{}:{}", table(kind, params), symbol.as_str().to_uppercase())
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"op": "subscribe", "args": [topic(sub)]})))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"op": "unsubscribe", "args": [topic(sub)]})))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        let table = msg.get("table")?.as_str()?;
        let symbol = msg.get("data")?.as_array()?.first()?.get("symbol")?.as_str()?;
        Some(format!("{table}:{symbol}"))
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let removing = msg.get("action").and_then(Value::as_str) == Some("delete");
        let mut delta = OrderBookDelta::new(sub.symbol.clone());
        for row in array(msg, "data")? {
            let price = Price::from_value(field(row, "price")?)?;
            let level = if removing {
                PriceLevel::removal(price)
            } else {
                PriceLevel::new(price, Amount::from_value(field(row, "size")?)?)
            };
            delta.push(side(row)?, level);
        }
        if delta.is_empty() {
            return Ok(BookPayload::Nothing);
        }
        Ok(BookPayload::Delta(delta))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        if is_partial(msg) {
            return Ok(TradeBatch::history());
        }
        let trades = array(msg, "data")?
            .iter()
            .map(|row| -> Result<NormalizedTrade, DecodeError> {
                Ok(NormalizedTrade {
                    symbol: sub.symbol.clone(),
                    id: id_field(row, "trdMatchID")?,
                    price: Price::from_value(field(row, "price")?)?,
                    amount: Amount::from_value(field(row, "size")?)?,
                    timestamp: rfc3339_millis(str_field(row, "timestamp")?)?,
                    side: side(row)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TradeBatch::live(trades))
    }

    fn parse_ticker(
        &self,
        msg: &Value,
        sub: &ChannelSubscription,
    ) -> Result<Vec<NormalizedTicker>, DecodeError> {
        if is_partial(msg) {
            return Ok(Vec::new());
        }
        array(msg, "data")?
            .iter()
            .map(|row| -> Result<NormalizedTicker, DecodeError> {
                Ok(NormalizedTicker {
                    bid: opt_price(row, "bidPrice")?,
                    ask: opt_price(row, "askPrice")?,
                    ..NormalizedTicker::new(sub.symbol.clone())
                })
            })
            .collect()
    }
}
