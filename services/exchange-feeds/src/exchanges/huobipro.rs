//! Huobi Pro market WebSocket
//!
//! Every frame is gzip-compressed. The server pings the client with
//! `{"ping": n}` and expects `{"pong": n}` back. Depth channels push the
//! full visible book each time, so books go through the reconciler.

use serde_json::{json, Value};
use std::time::Duration;
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookSnapshot, Side};
use types::numeric::{Amount, Price};
use types::time::{epoch_millis, EpochUnit};

use super::{
    array, field, id_field, joined_lower, json_frame, opt_amount, opt_price, parse_side,
    str_field, AckRef, BookMode, BookPayload, Control, ExchangeProfile, TradeBatch,
};
use crate::decoder::{Compression, Heartbeat};
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

const WS_URL: &str = "wss://api.huobi.pro/ws";
const DEFAULT_STEP: &str = "step0";

#[derive(Debug, Clone, Copy, Default)]
pub struct Huobipro;

impl ExchangeProfile for Huobipro {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Huobipro
    }

    fn default_url(&self) -> &'static str {
        WS_URL
    }

    fn compression(&self) -> Compression {
        Compression::Gzip
    }

    fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy {
            ping_interval: None,
            watchdog_interval: Some(Duration::from_secs(60)),
            deadline: Duration::from_secs(60),
        }
    }

    fn book_mode(&self) -> BookMode {
        BookMode::SnapshotOnly
    }

    fn ping_frame(&self, _request_id: u64) -> Option<Frame> {
        None
    }

    fn detect_heartbeat(&self, msg: &Value) -> Option<Heartbeat> {
        let ping = msg.get("ping")?;
        Some(Heartbeat::reply_with(json_frame(json!({"pong": ping}))))
    }

    fn classify(&self, msg: &Value) -> Control {
        if msg.get("ch").is_some() && msg.get("tick").is_some() {
            return Control::Data;
        }
        if msg.get("status").and_then(Value::as_str) == Some("error") {
            return Control::Rejected(msg.clone());
        }
        if let Some(channel) = msg.get("subbed").and_then(Value::as_str) {
            return Control::Subscribed(AckRef::Key(channel.to_string()));
        }
        if msg.get("unsubbed").is_some() {
            return Control::Unsubscribed;
        }
        Control::Other
    }

    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, params: &ChannelParams) -> String {
        let market = joined_lower(symbol);
        match kind {
            ChannelKind::OrderBook => format!(
                "market.{market}.depth.{}",
                params.precision.as_deref().unwrap_or(DEFAULT_STEP)
            ),
            ChannelKind::Trade => format!("market.{market}.trade.detail"),
            ChannelKind::Ticker => format!("market.{market}.ticker"),
            ChannelKind::Auth => format!("orders.{market}"),
        }
    }

    fn subscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"sub": sub.key, "id": request_id.to_string()})))
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame> {
        if sub.kind == ChannelKind::Auth {
            return None;
        }
        Some(json_frame(json!({"unsub": sub.key, "id": request_id.to_string()})))
    }

    fn route(&self, msg: &Value) -> Option<String> {
        msg.get("ch")?.as_str().map(str::to_string)
    }

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError> {
        let tick = field(msg, "tick")?;
        Ok(BookPayload::Snapshot(OrderBookSnapshot::from_levels(
            sub.symbol.clone(),
            parse_side(tick, "asks", None)?,
            parse_side(tick, "bids", None)?,
        )))
    }

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError> {
        let rows = array(field(msg, "tick")?, "data")?;
        let trades = rows
            .iter()
            .map(|row| -> Result<NormalizedTrade, DecodeError> {
                let side = match str_field(row, "direction")? {
                    "buy" => Side::Bid,
                    "sell" => Side::Ask,
                    other => return Err(DecodeError::Malformed(format!("unknown side {other}"))),
                };
                let id = match row.get("tradeId") {
                    Some(_) => id_field(row, "tradeId")?,
                    None => id_field(row, "id")?,
                };
                Ok(NormalizedTrade {
                    symbol: sub.symbol.clone(),
                    id,
                    price: Price::from_value(field(row, "price")?)?,
                    amount: Amount::from_value(field(row, "amount")?)?,
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
        let tick = field(msg, "tick")?;
        let last = match opt_price(tick, "lastPrice")? {
            Some(last) => Some(last),
            None => opt_price(tick, "close")?,
        };
        Ok(vec![NormalizedTicker {
            symbol: sub.symbol.clone(),
            bid: opt_price(tick, "bid")?,
            ask: opt_price(tick, "ask")?,
            last,
            volume: opt_amount(tick, "vol")?,
            high: opt_price(tick, "high")?,
            low: opt_price(tick, "low")?,
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
            key: Huobipro.channel_key(kind, &symbol, &params),
            kind,
            symbol,
            params,
            acknowledged: true,
            primed: false,
            alias: None,
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(sub(ChannelKind::OrderBook).key, "market.btcusdt.depth.step0");
        assert_eq!(sub(ChannelKind::Trade).key, "market.btcusdt.trade.detail");
        assert_eq!(sub(ChannelKind::Ticker).key, "market.btcusdt.ticker");
        let key = Huobipro.channel_key(
            ChannelKind::OrderBook,
            &Symbol::new("ethusdt"),
            &ChannelParams::default().precision("step1"),
        );
        assert_eq!(key, "market.ethusdt.depth.step1");
    }

    #[test]
    fn test_subscribe_and_ack() {
        let s = sub(ChannelKind::OrderBook);
        let Some(Frame::Text(text)) = Huobipro.subscribe_request(&s, 3) else {
            panic!("expected frame");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["sub"], "market.btcusdt.depth.step0");
        let ack = json!({"id":"3","status":"ok","subbed":"market.btcusdt.depth.step0","ts":1489474081631u64});
        assert_eq!(
            Huobipro.classify(&ack),
            Control::Subscribed(AckRef::Key("market.btcusdt.depth.step0".to_string()))
        );
        let err = json!({"status":"error","err-code":"bad-request","err-msg":"invalid topic","id":"4"});
        assert!(matches!(Huobipro.classify(&err), Control::Rejected(_)));
    }

    #[test]
    fn test_depth_is_snapshot() {
        let msg = json!({"ch":"market.btcusdt.depth.step0","ts":1489474082831u64,"tick":{
            "bids":[[9999.3900,0.0098],[9992.5947,0.0560]],
            "asks":[[10010.9800,0.0099]]
        }});
        assert_eq!(Huobipro.route(&msg).as_deref(), Some("market.btcusdt.depth.step0"));
        let BookPayload::Snapshot(snap) = Huobipro.parse_book(&msg, &sub(ChannelKind::OrderBook)).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks.len(), 1);
        assert!(snap.asks.contains_key(&Price::from_str("10010.98").unwrap()));
    }

    #[test]
    fn test_trade_detail() {
        let msg = json!({"ch":"market.btcusdt.trade.detail","ts":1630994963175u64,"tick":{"id":137005445109u64,"ts":1630994963173u64,"data":[
            {"id":"137005445109359286410323766","ts":1630994963173u64,"tradeId":102523573486u64,"amount":0.006754,"price":52648.62,"direction":"buy"}
        ]}});
        let batch = Huobipro.parse_trades(&msg, &sub(ChannelKind::Trade)).unwrap();
        let t = &batch.trades[0];
        assert_eq!(t.id, "102523573486");
        assert_eq!(t.side, Side::Bid);
        assert_eq!(t.timestamp, 1_630_994_963_173);
        assert_eq!(t.price, Price::from_str("52648.62").unwrap());
    }

    #[test]
    fn test_ticker_close_fallback() {
        let msg = json!({"ch":"market.btcusdt.ticker","tick":{"bid":100.1,"ask":100.2,"close":100.15,"vol":5000,"high":101,"low":99}});
        let t = &Huobipro.parse_ticker(&msg, &sub(ChannelKind::Ticker)).unwrap()[0];
        assert_eq!(t.last, Some(Price::from_str("100.15").unwrap()));
        assert_eq!(t.bid, Some(Price::from_str("100.1").unwrap()));
        assert_eq!(t.volume, Some(Amount::from_str("5000").unwrap()));
    }

    #[test]
    fn test_ping_reply() {
        let hb = Huobipro.detect_heartbeat(&json!({"ping": 1492420473027u64})).unwrap();
        let Some(Frame::Text(text)) = hb.reply else {
            panic!("expected reply");
        };
        assert_eq!(text, r#"{"pong":1492420473027}"#);
    }
}
