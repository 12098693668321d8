//! OKX v5 public WebSocket
//!
//! Subscriptions are `{op, args: [{channel, instId}]}` and every push echoes
//! the same `arg` object, which is what the key is built from.

use serde_json::{json, Value};
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, Side};
use types::numeric::{Amount, Price};
use types::time::{epoch_millis, EpochUnit};

use super::{
    array, dashed_upper, field, id_field, json_frame, opt_amount, opt_checksum, opt_price, parse_side,
    str_field, AckRef, BookMode, BookPayload, Control, ExchangeProfile, TradeBatch,
};
use crate::decoder::Heartbeat;
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
/// Size of the recent-trades replay pushed right after subscribing.
pub(crate) const TRADE_HISTORY_BATCH: usize = 60;
const COUNT_INDEX: Option<usize> = Some(3);

#[derive(Debug, Clone, Copy, Default)]
pub struct Okex;

fn channel(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::OrderBook => "books",
        ChannelKind::Trade => "trades",
        ChannelKind::Ticker => "tickers",
        ChannelKind::Auth => "login",
    }
}

fn arg_key(arg: &Value) -> Option<String> {
    let channel = arg.get("channel")?.as_str()?;
    let inst = arg.get("instId")?.as_str()?;
    Some(format!("{channel}:{inst}"))
}

fn first_data(msg: &Value) -> Result<&Value, DecodeError> {
    array(msg, "data")?
        .first()
        .ok_or_else(|| DecodeError::Malformed("empty `data`".to_string()))
}

fn request(op: &str, sub: &ChannelSubscription) -> Option<Frame> {
    if sub.kind == ChannelKind::Auth {
        return None;
    }
    Some(json_frame(json!({
        "op": op,
        "args": [{"channel": channel(sub.kind), "instId": dashed_upper(&sub.symbol)}],
    })))
}

impl ExchangeProfile for Okex {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okex
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
        Some(Frame::text("ping"))
    }

    fn detect_heartbeat(&self, _msg: &Value) -> Option<Heartbeat> {
        None
    }

    fn classify(&self, msg: &Value) -> Control {
        match msg.get("event").and_then(Value::as_str) {
            Some("subscribe") => match msg.get("arg").and_then(arg_key) {
                Some(key) => Control::Subscribed(AckRef::Key(key)),
                None => Control::Other,
            },
            Some("unsubscribe") => Control::Unsubscribed,
            Some("error") => Control::Rejected(msg.clone()),
            Some(_) => Control::Other,
            None if msg.get("arg").is_some() && msg.get("data").is_some() => Control::Data,
            None => Control::Other,
        }
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, _params: &ChannelParams) -> String {
        format!("{}:{}", channel(kind), dashed_upper(symbol))
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        request("subscribe", sub)
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, _request_id: u64) -> Option<Frame> {
        request("unsubscribe", sub)
    }

    fn route(&self, msg: &Value) -> Option<String> {
        arg_key(msg.get("arg")?)
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let book = first_data(msg)?;
        // the initial `snapshot` push is emitted as a delta like any update
        let delta = OrderBookDelta {
            symbol: sub.symbol.clone(),
            asks: parse_side(book, "asks", COUNT_INDEX)?,
            bids: parse_side(book, "bids", COUNT_INDEX)?,
            checksum: opt_checksum(book)?,
        };
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
                    id: id_field(row, "tradeId")?,
                    price: Price::from_value(field(row, "px")?)?,
                    amount: Amount::from_value(field(row, "sz")?)?,
                    timestamp: epoch_millis(field(row, "ts")?, EpochUnit::Millis)?,
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
        let stats = first_data(msg)?;
        Ok(vec![NormalizedTicker {
            symbol: sub.symbol.clone(),
            bid: opt_price(stats, "bidPx")?,
            ask: opt_price(stats, "askPx")?,
            last: opt_price(stats, "last")?,
            volume: opt_amount(stats, "vol24h")?,
            high: opt_price(stats, "high24h")?,
            low: opt_price(stats, "low24h")?,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sub(kind: ChannelKind) -> ChannelSubscription {
        let symbol = Symbol::new("btc_usdt");
        let params = ChannelParams::default();
        ChannelSubscription {
            key: Okex.channel_key(kind, &symbol, &params),
            kind,
            symbol,
            params,
            acknowledged: true,
            primed: false,
            alias: None,
        }
    }

    #[test]
    fn test_key_route_and_ack_agree() {
        let s = sub(ChannelKind::OrderBook);
        assert_eq!(s.key, "books:BTC-USDT");
        let Some(Frame::Text(text)) = Okex.subscribe_request(&s, 1) else {
            panic!("expected frame");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["args"][0], json!({"channel":"books","instId":"BTC-USDT"}));

        let ack = json!({"event":"subscribe","arg":{"channel":"books","instId":"BTC-USDT"}});
        assert_eq!(Okex.classify(&ack), Control::Subscribed(AckRef::Key(s.key.clone())));
        let push = json!({"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{"asks":[],"bids":[]}]});
        assert_eq!(Okex.classify(&push), Control::Data);
        assert_eq!(Okex.route(&push), Some(s.key));
    }

    #[test]
    fn test_error_event() {
        let msg = json!({"event":"error","code":"60012","msg":"Invalid request"});
        assert!(matches!(Okex.classify(&msg), Control::Rejected(_)));
    }

    #[test]
    fn test_book_update_carries_counts() {
        let msg = json!({"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{
            "asks":[["41006.8","0","0","0"]],
            "bids":[["41006.3","0.3","0","2"]],
            "ts":"1629966436396","checksum":-855196043
        }]});
        let BookPayload::Delta(delta) = Okex.parse_book(&msg, &sub(ChannelKind::OrderBook)).unwrap() else {
            panic!("expected delta");
        };
        assert!(delta.asks[0].is_removal());
        assert_eq!(delta.bids[0].count, Some(2));
        assert_eq!(delta.bids[0].amount, Amount::from_str("0.3").unwrap());
        assert_eq!(delta.checksum, Some(-855_196_043));
    }

    #[test]
    fn test_book_snapshot_action_is_delta() {
        let msg = json!({"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{
            "asks":[["41006.8","0.6","0","1"]],"bids":[]
        }]});
        let BookPayload::Delta(delta) = Okex.parse_book(&msg, &sub(ChannelKind::OrderBook)).unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.asks[0].count, Some(1));
        assert_eq!(delta.checksum, None);
    }

    #[test]
    fn test_trades() {
        let msg = json!({"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[
            {"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.12060306","side":"sell","ts":"1630048897897"}
        ]});
        let batch = Okex.parse_trades(&msg, &sub(ChannelKind::Trade)).unwrap();
        assert!(!batch.history);
        let t = &batch.trades[0];
        assert_eq!(t.side, Side::Ask);
        assert_eq!(t.timestamp, 1_630_048_897_897);
        assert_eq!(t.id, "130639474");
    }

    #[test]
    fn test_trade_replay_batch_is_history() {
        let row = json!({"tradeId":"1","px":"1","sz":"1","side":"buy","ts":"1"});
        let msg = json!({"arg":{"channel":"trades","instId":"BTC-USDT"},"data": vec![row; TRADE_HISTORY_BATCH]});
        assert!(Okex.parse_trades(&msg, &sub(ChannelKind::Trade)).unwrap().history);
    }

    #[test]
    fn test_ticker() {
        let msg = json!({"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{
            "instId":"BTC-USDT","last":"9999.99","bidPx":"8888.88","askPx":"9999.99",
            "high24h":"10000","low24h":"8000","vol24h":"2222"
        }]});
        let t = &Okex.parse_ticker(&msg, &sub(ChannelKind::Ticker)).unwrap()[0];
        assert_eq!(t.bid, Some(Price::from_str("8888.88").unwrap()));
        assert_eq!(t.high, Some(Price::from_u64(10000)));
        assert_eq!(t.volume, Some(Amount::from_str("2222").unwrap()));
    }
}
