//! OKEx v3 WebSocket (spot)
//!
//! Frames are raw-deflate compressed binary. Topics are `spot/<channel>:<INST>`
//! and pushes carry `{table, data: [{instrument_id, ..}]}`.

use serde_json::{json, Value};
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, Side};
use types::numeric::{Amount, Price};
use types::time::rfc3339_millis;

use super::okex::TRADE_HISTORY_BATCH;
use super::{
    array, dashed_upper, field, id_field, json_frame, opt_amount, opt_checksum, opt_price, parse_side,
    str_field, AckRef, BookMode, BookPayload, Control, ExchangeProfile, TradeBatch,
};
use crate::decoder::{Compression, Heartbeat};
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://real.okex.com:10442/ws/v3";
const COUNT_INDEX: Option<usize> = Some(2);

#[derive(Debug, Clone, Copy, Default)]
pub struct Okex3;

fn table(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::OrderBook => "spot/depth",
        ChannelKind::Trade => "spot/trade",
        ChannelKind::Ticker => "spot/ticker",
        ChannelKind::Auth => "spot/account",
    }
}

impl ExchangeProfile for Okex3 {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okex3
    }

    fn default_url(&self) -> &'static str {
        WS_URL
    }

    fn compression(&self) -> Compression {
        Compression::RawDeflate
    }

    fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy::default()
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
        match msg.get("event").and_then(Value::as_str) {
            Some("subscribe") => match msg.get("channel").and_then(Value::as_str) {
                Some(channel) => Control::Subscribed(AckRef::Key(channel.to_string())),
                None => Control::Other,
            },
            Some("unsubscribe") => Control::Unsubscribed,
            Some("error") => Control::Rejected(msg.clone()),
            _ => Control::Other,
        }
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, _params: &ChannelParams) -> String {
        format!("{}:{}", table(kind), dashed_upper(symbol))
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"op": "subscribe", "args": [sub.key]})))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"op": "unsubscribe", "args": [sub.key]})))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        let table = msg.get("table")?.as_str()?;
        let inst = msg
            .get("data")?
            .as_array()?
            .first()?
            .get("instrument_id")?
            .as_str()?;
        Some(format!("{table}:{inst}"))
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let mut delta = OrderBookDelta::new(sub.symbol.clone());
        for book in array(msg, "data")? {
            delta.asks.extend(parse_side(book, "asks", COUNT_INDEX)?);
            delta.bids.extend(parse_side(book, "bids", COUNT_INDEX)?);
            // the book after the last entry is what the checksum covers
            delta.checksum = opt_checksum(book)?;
        }
        if delta.is_empty() {
            return Ok(BookPayload::Nothing);
        }
        Ok(BookPayload::Delta(delta))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        let rows = array(msg, "data")?;
        if rows.len() == TRADE_HISTORY_BATCH {
            return Ok(TradeBatch::history());
        }
        let trades = rows
            .iter()
            .map(|row| -> Result<NormalizedTrade, DecodeError> {
                let side = match str_field(row, "side")? {
                    "buy" => Side::Bid,
                    "sell" => Side::Ask,
                    other => return Err(DecodeError::Malformed(format!("unknown side {other}"))),
                };
                Ok(NormalizedTrade {
                    symbol: sub.symbol.clone(),
                    id: id_field(row, "trade_id")?,
                    price: Price::from_value(field(row, "price")?)?,
                    amount: Amount::from_value(field(row, "size")?)?,
                    timestamp: rfc3339_millis(str_field(row, "timestamp")?)?,
                    side,
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
        array(msg, "data")?
            .iter()
            .map(|stats| -> Result<NormalizedTicker, DecodeError> {
                Ok(NormalizedTicker {
                    symbol: sub.symbol.clone(),
                    bid: opt_price(stats, "best_bid")?,
                    ask: opt_price(stats, "best_ask")?,
                    last: opt_price(stats, "last")?,
                    volume: opt_amount(stats, "base_volume_24h")?,
                    high: opt_price(stats, "high_24h")?,
                    low: opt_price(stats, "low_24h")?,
                })
            })
            .collect()
    }
}
