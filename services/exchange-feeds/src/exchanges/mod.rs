//! Exchange profiles
//!
//! Everything that differs between exchanges lives behind [`ExchangeProfile`]:
//! frame compression, heartbeat shape, subscription keys and requests,
//! control-message classification, and field mapping into the canonical
//! model. The session and normalizer are written once against this trait.

use serde_json::Value;
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta, OrderBookSnapshot, PriceLevel};
use types::numeric::{count_from_value, Amount, Price};

use crate::decoder::{Compression, Heartbeat};
use crate::error::DecodeError;
use crate::liveness::LivenessPolicy;
use crate::registry::{ChannelKind, ChannelParams, ChannelSubscription};
use crate::transport::Frame;

pub mod bitfinex;
pub mod bitmex;
pub mod gateio;
pub mod huobipro;
pub mod okex;
pub mod okex3;
pub mod zb;

/// How an exchange delivers order book data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookMode {
    /// Native incremental updates, emitted as deltas directly.
    Incremental,
    /// Full snapshots only, diffed by the reconciler.
    SnapshotOnly,
}

/// Unit an exchange subscribes and unsubscribes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Each market of a channel is requested on its own.
    Market,
    /// One request carries every market of a channel kind, and unsubscribing
    /// drops them all.
    Channel,
}

/// Identifies which subscription a confirmation refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRef {
    /// Confirmation carries the channel key itself.
    Key(String),
    /// Confirmation echoes only the request id.
    Request(u64),
    /// Confirmation assigns an exchange channel id to a key.
    Bound { alias: String, key: String },
}

/// Classification of a decoded, non-heartbeat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Subscribed(AckRef),
    Unsubscribed,
    Rejected(Value),
    /// Channel data to route and normalize.
    Data,
    /// Informational message with no effect on session state.
    Other,
}

/// Order book content of one message.
#[derive(Debug, Clone, PartialEq)]
pub enum BookPayload {
    Delta(OrderBookDelta),
    Snapshot(OrderBookSnapshot),
    Nothing,
}

/// Trades carried by one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeBatch {
    pub trades: Vec<NormalizedTrade>,
    /// The batch is the history replay sent on subscribe.
    pub history: bool,
}

impl TradeBatch {
    pub fn live(trades: Vec<NormalizedTrade>) -> Self {
        Self {
            trades,
            history: false,
        }
    }

    pub fn history() -> Self {
        Self {
            trades: Vec::new(),
            history: true,
        }
    }
}

/// Per-exchange wire protocol behavior.
pub trait ExchangeProfile: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Public market-data endpoint.
    fn default_url(&self) -> &'static str;

    fn compression(&self) -> Compression {
        Compression::None
    }

    fn liveness(&self) -> LivenessPolicy;

    fn book_mode(&self) -> BookMode;

    /// Client ping, if this exchange expects the client to send one.
    fn ping_frame(&self, request_id: u64) -> Option<Frame>;

    /// Recognize a JSON heartbeat (pong, server ping, channel heartbeat).
    fn detect_heartbeat(&self, msg: &Value) -> Option<Heartbeat>;

    fn classify(&self, msg: &Value) -> Control;

    /// Registry key for a subscription. Must equal what [`route`] computes
    /// for that subscription's data messages.
    ///
    /// [`route`]: ExchangeProfile::route
    fn channel_key(&self, kind: ChannelKind, symbol: &Symbol, params: &ChannelParams) -> String;

    fn subscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame>;

    fn subscription_scope(&self) -> SubscriptionScope {
        SubscriptionScope::Market
    }

    /// One request subscribing every market in `subs`, all of the same kind.
    /// Only called for [`SubscriptionScope::Channel`] exchanges.
    fn channel_subscribe_request(
        &self,
        _subs: &[&ChannelSubscription],
        _request_id: u64,
    ) -> Option<Frame> {
        None
    }

    fn unsubscribe_request(&self, sub: &ChannelSubscription, request_id: u64) -> Option<Frame>;

    /// Registry key or alias a data message belongs to.
    fn route(&self, msg: &Value) -> Option<String>;

    fn parse_book(&self, msg: &Value, sub: &ChannelSubscription) -> Result<BookPayload, DecodeError>;

    fn parse_trades(&self, msg: &Value, sub: &ChannelSubscription) -> Result<TradeBatch, DecodeError>;

    fn parse_ticker(
        &self,
        msg: &Value,
        sub: &ChannelSubscription,
    ) -> Result<Vec<NormalizedTicker>, DecodeError>;

    /// Whether the first trade batch on a channel is a history replay.
    fn first_trade_batch_is_snapshot(&self) -> bool {
        false
    }
}

/// Profile implementation for an exchange.
pub fn profile_for(exchange: ExchangeId) -> Box<dyn ExchangeProfile> {
    match exchange {
        ExchangeId::Bitfinex => Box::new(bitfinex::Bitfinex),
        ExchangeId::Bitmex => Box::new(bitmex::Bitmex),
        ExchangeId::Gateio => Box::new(gateio::Gateio),
        ExchangeId::Huobipro => Box::new(huobipro::Huobipro),
        ExchangeId::Okex => Box::new(okex::Okex),
        ExchangeId::Okex3 => Box::new(okex3::Okex3),
        ExchangeId::Zb => Box::new(zb::Zb),
    }
}

/// Serialize a JSON value into a text frame.
pub(crate) fn json_frame(value: Value) -> Frame {
    Frame::Text(value.to_string())
}

pub(crate) fn field<'a>(msg: &'a Value, name: &'static str) -> Result<&'a Value, DecodeError> {
    match msg.get(name) {
        Some(Value::Null) | None => Err(DecodeError::MissingField(name)),
        Some(v) => Ok(v),
    }
}

pub(crate) fn array<'a>(msg: &'a Value, name: &'static str) -> Result<&'a Vec<Value>, DecodeError> {
    field(msg, name)?
        .as_array()
        .ok_or_else(|| DecodeError::Malformed(format!("`{name}` is not an array")))
}

pub(crate) fn str_field<'a>(msg: &'a Value, name: &'static str) -> Result<&'a str, DecodeError> {
    field(msg, name)?
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("`{name}` is not a string")))
}

/// Id-like field as text, whether the exchange sends a string or a number.
pub(crate) fn id_field(msg: &Value, name: &'static str) -> Result<String, DecodeError> {
    match field(msg, name)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DecodeError::Malformed(format!("`{name}` is not an id: {other}"))),
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Optional price field. Absent, null and empty-string values map to `None`.
pub(crate) fn opt_price(msg: &Value, name: &str) -> Result<Option<Price>, DecodeError> {
    let value = msg.get(name);
    if is_absent(value) {
        return Ok(None);
    }
    Ok(value.map(Price::from_value).transpose()?)
}

pub(crate) fn opt_amount(msg: &Value, name: &str) -> Result<Option<Amount>, DecodeError> {
    let value = msg.get(name);
    if is_absent(value) {
        return Ok(None);
    }
    Ok(value.map(Amount::from_value).transpose()?)
}

/// Positional variant of [`opt_price`] for array payloads.
pub(crate) fn opt_price_at(row: &[Value], index: usize) -> Result<Option<Price>, DecodeError> {
    let value = row.get(index);
    if is_absent(value) {
        return Ok(None);
    }
    Ok(value.map(Price::from_value).transpose()?)
}

pub(crate) fn opt_amount_at(row: &[Value], index: usize) -> Result<Option<Amount>, DecodeError> {
    let value = row.get(index);
    if is_absent(value) {
        return Ok(None);
    }
    Ok(value.map(Amount::from_value).transpose()?)
}

/// Parse `[[price, amount, ..], ..]` rows into levels.
///
/// When `count_index` is given and the row has that element, it becomes the
/// level's order count.
pub(crate) fn parse_levels(
    rows: &Value,
    count_index: Option<usize>,
) -> Result<Vec<PriceLevel>, DecodeError> {
    let rows = rows
        .as_array()
        .ok_or_else(|| DecodeError::Malformed("book side is not an array".to_string()))?;
    rows.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| DecodeError::Malformed(format!("level is not an array: {row}")))?;
            let (Some(price), Some(amount)) = (row.first(), row.get(1)) else {
                return Err(DecodeError::Malformed("level needs price and amount".to_string()));
            };
            let price = Price::from_value(price)?;
            let amount = Amount::from_value(amount)?;
            match count_index.and_then(|i| row.get(i)) {
                Some(count) => Ok(PriceLevel::with_count(price, amount, count_from_value(count)?)),
                None => Ok(PriceLevel::new(price, amount)),
            }
        })
        .collect()
}

/// Optional book side: a missing key yields no levels.
pub(crate) fn parse_side(
    msg: &Value,
    name: &str,
    count_index: Option<usize>,
) -> Result<Vec<PriceLevel>, DecodeError> {
    match msg.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(rows) => parse_levels(rows, count_index),
    }
}

/// Exchange book checksum, when present. Non-integer values are malformed.
pub(crate) fn opt_checksum(msg: &Value) -> Result<Option<i64>, DecodeError> {
    match msg.get("checksum") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| DecodeError::Malformed("`checksum` is not an integer".to_string())),
    }
}

/// `btc_usdt` style symbol in `BTC-USDT` instrument form.
pub(crate) fn dashed_upper(symbol: &Symbol) -> String {
    symbol.as_str().replace(['_', '/'], "-").to_uppercase()
}

/// `btc_usdt` style symbol with separators removed and lowercased.
pub(crate) fn joined_lower(symbol: &Symbol) -> String {
    symbol
        .as_str()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | '/'))
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_profile_for_every_exchange() {
        for id in ExchangeId::ALL {
            assert_eq!(profile_for(id).exchange(), id);
        }
    }

    #[test]
    fn test_parse_levels_with_count() {
        let rows = json!([["101.5", "2", "0", "3"], ["102", "0", "0", "0"]]);
        let levels = parse_levels(&rows, Some(3)).unwrap();
        assert_eq!(levels[0].price, Price::from_str("101.5").unwrap());
        assert_eq!(levels[0].count, Some(3));
        assert!(levels[1].is_removal());
    }

    #[test]
    fn test_parse_levels_rejects_short_rows() {
        assert!(parse_levels(&json!([["101"]]), None).is_err());
        assert!(parse_levels(&json!({"a": 1}), None).is_err());
    }

    #[test]
    fn test_optional_fields() {
        let msg = json!({"bid": "1.5", "ask": "", "last": null});
        assert_eq!(opt_price(&msg, "bid").unwrap(), Some(Price::from_str("1.5").unwrap()));
        assert_eq!(opt_price(&msg, "ask").unwrap(), None);
        assert_eq!(opt_price(&msg, "last").unwrap(), None);
        assert_eq!(opt_amount(&msg, "vol").unwrap(), None);
        assert!(opt_price(&json!({"bid": "x"}), "bid").is_err());
    }

    #[test]
    fn test_checksum_field() {
        assert_eq!(opt_checksum(&json!({"checksum": -855196043})).unwrap(), Some(-855_196_043));
        assert_eq!(opt_checksum(&json!({"asks": []})).unwrap(), None);
        assert!(opt_checksum(&json!({"checksum": "abc"})).is_err());
    }

    #[test]
    fn test_symbol_forms() {
        assert_eq!(dashed_upper(&Symbol::new("btc_usdt")), "BTC-USDT");
        assert_eq!(joined_lower(&Symbol::new("BTC_USDT")), "btcusdt");
        assert_eq!(joined_lower(&Symbol::new("btcusdt")), "btcusdt");
    }

    #[test]
    fn test_id_field_accepts_numbers() {
        let msg = json!({"tid": 42, "id": "abc"});
        assert_eq!(id_field(&msg, "tid").unwrap(), "42");
        assert_eq!(id_field(&msg, "id").unwrap(), "abc");
        assert!(matches!(id_field(&msg, "x"), Err(DecodeError::MissingField("x"))));
    }
}
