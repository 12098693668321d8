//! Gate.io WebSocket v3
//!
//! JSON-RPC style: requests are `{id, method, params}` and confirmations echo
//! only the request id, so subscriptions are acknowledged through tracked
//! request ids. Pushes are `{method: "<channel>.update", params: [...]}`.
//!
//! Subscriptions are per channel kind: each `<channel>.subscribe` replaces the
//! market set, and `<channel>.unsubscribe` drops every market at once.

use serde_json::{json, Value};
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, Side};
use types::numeric::{Amount, Price};
use types::time::{epoch_millis, EpochUnit};

use super::{
    field, id_field, json_frame, opt_amount, opt_price, parse_side, str_field, AckRef, BookMode,
    BookPayload, Control, ExchangeProfile, SubscriptionScope, TradeBatch,
};
use crate::decoder::Heartbeat;
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://ws.gate.io/v3/";
const DEFAULT_DEPTH: u32 = 30;
const DEFAULT_INTERVAL: &str = "0.000001";

#[derive(Debug, Clone, Copy, Default)]
pub struct Gateio;

fn channel(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::OrderBook => "depth",
        ChannelKind::Trade => "trades",
        ChannelKind::Ticker => "ticker",
        ChannelKind::Auth => "server",
    }
}

fn market(symbol: &Symbol) -> String {
    match symbol.split_pair() {
        Some((base, quote)) => format!("{base}_{quote}"),
        None => symbol.as_str().to_string(),
    }
    .to_uppercase()
}

/// `[market, depth, interval]` for one order book market.
fn depth_params(sub: &ChannelSubscription) -> Value {
    json!([
        market(&sub.symbol),
        sub.params.depth.unwrap_or(DEFAULT_DEPTH),
        sub.params.precision.as_deref().unwrap_or(DEFAULT_INTERVAL),
    ])
}

fn params(msg: &Value) -> Result<&Vec<Value>, DecodeError> {
    field(msg, "params")?
        .as_array()
        .ok_or_else(|| DecodeError::Malformed("`params` is not an array".to_string()))
}

fn param(msg: &Value, index: usize) -> Result<&Value, DecodeError> {
    params(msg)?
        .get(index)
        .ok_or_else(|| DecodeError::Malformed(format!("missing params[{index}]")))
}

impl ExchangeProfile for Gateio {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Gateio
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

    fn ping_frame(&self, request_id: u64) -> Option<Frame> {
        Some(json_frame(json!({"id": request_id, "method": "server.ping", "params": []})))
    }

    fn detect_heartbeat(&self, msg: &Value) -> Option<Heartbeat> {
        (msg.get("result").and_then(Value::as_str) == Some("pong")).then(Heartbeat::silent)
    }

    fn classify(&self, msg: &Value) -> Control {
        if msg.get("method").and_then(Value::as_str).is_some() {
            return Control::Data;
        }
        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            return Control::Other;
        };
        match msg.get("error") {
            Some(Value::Null) | None => {}
            Some(_) => return Control::Rejected(msg.clone()),
        }
        match msg.get("result").and_then(|r| r.get("status")).and_then(Value::as_str) {
            Some("success") => Control::Subscribed(AckRef::Request(id)),
            _ => Control::Other,
        }
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, _params: &ChannelParams) -> String {
        format!("{}:{}", channel(kind), market(symbol))
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame> {
        self.channel_subscribe_request(&[sub], request_id)
    }

    fn subscription_scope(&self) -> SubscriptionScope {
        SubscriptionScope::Channel
    }

    fn channel_subscribe_request(
        &self,
        subs: &[&ChannelSubscription],
        request_id: u64,
    ) -> Option<Frame> {
        let kind = subs.first()?.kind;
        let params = match (kind, subs) {
            (ChannelKind::Auth, _) => return None,
            // a single depth market is sent flat, several as a list of triples
            (ChannelKind::OrderBook, [sub]) => depth_params(sub),
            (ChannelKind::OrderBook, _) => subs.iter().map(|sub| depth_params(sub)).collect(),
            (ChannelKind::Trade | ChannelKind::Ticker, _) => subs
                .iter()
                .map(|sub| Value::String(market(&sub.symbol)))
                .collect(),
        };
        Some(json_frame(json!({
            "id": request_id,
            "method": format!("{}.subscribe", channel(kind)),
            "params": params,
        })))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({
            "id": request_id,
            "method": format!("{}.unsubscribe", channel(sub.kind)),
            "params": [],
        })))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        let method = msg.get("method")?.as_str()?;
        let params = msg.get("params")?.as_array()?;
        match method {
            "depth.update" => Some(format!("depth:{}", params.get(2)?.as_str()?)),
            "trades.update" => Some(format!("trades:{}", params.first()?.as_str()?)),
            "ticker.update" => Some(format!("ticker:{}", params.first()?.as_str()?)),
            _ => None,
        }
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let book = param(msg, 1)?;
        let delta = OrderBookDelta {
            symbol: sub.symbol.clone(),
            asks: parse_side(book, "asks", None)?,
            bids: parse_side(book, "bids", None)?,
            checksum: None,
        };
        if delta.is_empty() {
            return Ok(BookPayload::Nothing);
        }
        Ok(BookPayload::Delta(delta))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        let rows = param(msg, 1)?
            .as_array()
            .ok_or_else(|| DecodeError::Malformed("trades are not an array".to_string()))?;
        let trades = rows
            .iter()
            .map(|row| -> Result<NormalizedTrade, DecodeError> {
                let side = match str_field(row, "type")? {
                    "buy" => Side::Bid,
                    "sell" => Side::Ask,
                    other => return Err(DecodeError::Malformed(format!("unknown side {other}"))),
                };
                Ok(NormalizedTrade {
                    symbol: sub.symbol.clone(),
                    id: id_field(row, "id")?,
                    price: Price::from_value(field(row, "price")?)?,
                    amount: Amount::from_value(field(row, "amount")?)?,
                    timestamp: epoch_millis(field(row, "time")?, EpochUnit::Seconds)?,
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
        let stats = param(msg, 1)?;
        Ok(vec![NormalizedTicker {
            last: opt_price(stats, "last")?,
            volume: opt_amount(stats, "baseVolume")?,
            high: opt_price(stats, "high")?,
            low: opt_price(stats, "low")?,
            ..NormalizedTicker::new(sub.symbol.clone())
        }])
    }

    fn first_trade_batch_is_snapshot(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use types::market::PriceLevel;

    fn sub(kind: ChannelKind) -> ChannelSubscription {
        sub_for(kind, "btc_usdt")
    }

    fn sub_for(kind: ChannelKind, symbol: &str) -> ChannelSubscription {
        let symbol = Symbol::new(symbol);
        let params = ChannelParams::default();
        ChannelSubscription {
            key: Gateio.channel_key(kind, &symbol, &params),
            kind,
            symbol,
            params,
            acknowledged: true,
            primed: true,
            alias: None,
        }
    }

    #[test]
    fn test_subscribe_request_carries_id() {
        let s = sub(ChannelKind::OrderBook);
        assert_eq!(s.key, "depth:BTC_USDT");
        let Some(Frame::Text(text)) = Gateio.subscribe_request(&s, 77) else {
            panic!("expected frame");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["id"], json!(77));
        assert_eq!(v["method"], "depth.subscribe");
        assert_eq!(v["params"], json!(["BTC_USDT", 30, "0.000001"]));
    }

    #[test]
    fn test_channel_request_lists_every_market() {
        let btc = sub_for(ChannelKind::OrderBook, "btc_usdt");
        let mut eth = sub_for(ChannelKind::OrderBook, "eth-usdt");
        eth.params = ChannelParams::with_depth(5).precision("0.01");
        let Some(Frame::Text(text)) = Gateio.channel_subscribe_request(&[&btc, &eth], 9) else {
            panic!("expected frame");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["method"], "depth.subscribe");
        assert_eq!(
            v["params"],
            json!([["BTC_USDT", 30, "0.000001"], ["ETH_USDT", 5, "0.01"]])
        );

        let trades = [sub_for(ChannelKind::Trade, "btc_usdt"), sub_for(ChannelKind::Trade, "ltc_btc")];
        let Some(Frame::Text(text)) = Gateio.channel_subscribe_request(&[&trades[0], &trades[1]], 10) else {
            panic!("expected frame");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["params"], json!(["BTC_USDT", "LTC_BTC"]));
        assert!(Gateio.channel_subscribe_request(&[], 11).is_none());
        assert_eq!(Gateio.subscription_scope(), SubscriptionScope::Channel);
    }

    #[test]
    fn test_ack_by_request_id() {
        let ack = json!({"error":null,"result":{"status":"success"},"id":77});
        assert_eq!(Gateio.classify(&ack), Control::Subscribed(AckRef::Request(77)));
        let err = json!({"error":{"code":2,"message":"invalid argument"},"result":null,"id":78});
        assert!(matches!(Gateio.classify(&err), Control::Rejected(_)));
    }

    #[test]
    fn test_pong_result() {
        assert!(Gateio.detect_heartbeat(&json!({"error":null,"result":"pong","id":5})).is_some());
        assert!(Gateio.detect_heartbeat(&json!({"method":"depth.update"})).is_none());
    }

    #[test]
    fn test_depth_update_route_and_parse() {
        let msg = json!({"method":"depth.update","params":[false,{"asks":[["8000.1","0"]],"bids":[["7999","1.2"]]},"BTC_USDT"],"id":null});
        assert_eq!(Gateio.route(&msg).as_deref(), Some("depth:BTC_USDT"));
        let BookPayload::Delta(delta) = Gateio.parse_book(&msg, &sub(ChannelKind::OrderBook)).unwrap() else {
            panic!("expected delta");
        };
        assert!(delta.asks[0].is_removal());
        assert_eq!(
            delta.bids,
            vec![PriceLevel::new(Price::from_u64(7999), Amount::from_str("1.2").unwrap())]
        );
    }

    #[test]
    fn test_trades_update() {
        let msg = json!({"method":"trades.update","params":["BTC_USDT",[
            {"id":7172173,"time":1523339279.761838,"price":"398.59","amount":"0.027","type":"buy"}
        ]],"id":null});
        assert_eq!(Gateio.route(&msg).as_deref(), Some("trades:BTC_USDT"));
        let batch = Gateio.parse_trades(&msg, &sub(ChannelKind::Trade)).unwrap();
        let t = &batch.trades[0];
        assert_eq!(t.id, "7172173");
        assert_eq!(t.side, Side::Bid);
        assert_eq!(t.timestamp, 1_523_339_279_761);
        assert!(Gateio.first_trade_batch_is_snapshot());
    }

    #[test]
    fn test_ticker_update_has_no_quotes() {
        let msg = json!({"method":"ticker.update","params":["BTC_USDT",{
            "period":86400,"open":"0.03","close":"0.031","high":"0.032","low":"0.029",
            "last":"0.031","change":"0.5","quoteVolume":"100","baseVolume":"3.2"
        }],"id":null});
        let tickers = Gateio.parse_ticker(&msg, &sub(ChannelKind::Ticker)).unwrap();
        let t = &tickers[0];
        assert_eq!(t.bid, None);
        assert_eq!(t.ask, None);
        assert_eq!(t.last, Some(Price::from_str("0.031").unwrap()));
        assert_eq!(t.volume, Some(Amount::from_str("3.2").unwrap()));
    }
}
