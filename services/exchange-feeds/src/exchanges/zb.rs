//! ZB WebSocket
//!
//! Channels are named `<pair>_depth`, `<pair>_trades` and `<pair>_ticker`,
//! and every push echoes its `channel`. Depth pushes are full snapshots.
//! The server sends no subscription confirmation and needs no heartbeat.

use serde_json::{json, Value};
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookSnapshot, Side};
use types::numeric::{Amount, Price};
use types::time::{epoch_millis, EpochUnit};

use super::{
    array, field, id_field, joined_lower, json_frame, opt_amount, opt_price, parse_side,
    BookMode, BookPayload, Control, ExchangeProfile, TradeBatch,
};
use crate::decoder::Heartbeat;
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://api.zb.cn:9999/websocket";

#[derive(Debug, Clone, Copy, Default)]
pub struct Zb;

fn trade_side(row: &Value) -> Result<Side, DecodeError> {
    let token = match row.get("trade_type").and_then(Value::as_str) {
        Some(token) => token,
        None => row
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("trade_type"))?,
    };
    match token {
        "bid" | "buy" => Ok(Side::Bid),
        "ask" | "sell" => Ok(Side::Ask),
        other => Err(DecodeError::Malformed(format!("unknown side {other}"))),
    }
}

impl ExchangeProfile for Zb {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Zb
    }

    fn default_url(&self) -> &'static str {
        WS_URL
    }

    fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy::disabled()
    }

    fn book_mode(&self) -> BookMode {
        BookMode::SnapshotOnly
    }

    fn ping_frame(&self, _request_id: u64) -> Option<Frame> {
        None
    }

    fn detect_heartbeat(&self, msg: &Value) -> Option<Heartbeat> {
        (msg.get("event").and_then(Value::as_str) == Some("pong")).then(Heartbeat::silent)
    }

    fn classify(&self, msg: &Value) -> Control {
        if msg.get("dataType").is_some() {
            return Control::Data;
        }
        if msg.get("success").and_then(Value::as_bool) == Some(false) {
            return Control::Rejected(msg.clone());
        }
        Control::Other
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, _params: &ChannelParams) -> String {
        let pair = joined_lower(symbol);
        match kind {
            ChannelKind::OrderBook => format!("{pair}_depth"),
            ChannelKind::Trade => format!("{pair}_trades"),
            ChannelKind::Ticker => format!("{pair}_ticker"),
            ChannelKind::Auth => format!("{pair}_order"),
        }
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"event": "addChannel", "channel": sub.key})))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"event": "removeChannel", "channel": sub.key})))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        msg.get("channel")?.as_str().map(str::to_string)
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        Ok(BookPayload::Snapshot(OrderBookSnapshot::from_levels(
            sub.symbol.clone(),
            parse_side(msg, "asks", None)?,
            parse_side(msg, "bids", None)?,
        )))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        let trades = array(msg, "data")?
            .iter()
            .map(|row| -> Result<NormalizedTrade, DecodeError> {
                Ok(NormalizedTrade {
                    symbol: sub.symbol.clone(),
                    id: id_field(row, "tid")?,
                    price: Price::from_value(field(row, "price")?)?,
                    amount: Amount::from_value(field(row, "amount")?)?,
                    timestamp: epoch_millis(field(row, "date")?, EpochUnit::Seconds)?,
                    side: trade_side(row)?,
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
        let stats = field(msg, "ticker")?;
        Ok(vec![NormalizedTicker {
            symbol: sub.symbol.clone(),
            bid: opt_price(stats, "buy")?,
            ask: opt_price(stats, "sell")?,
            last: opt_price(stats, "last")?,
            volume: opt_amount(stats, "vol")?,
            high: opt_price(stats, "high")?,
            low: opt_price(stats, "low")?,
        }])
    }
}
