//! Wire decoder
//!
//! Turns a raw frame into either a heartbeat verdict or a parsed JSON
//! message. Binary frames are inflated according to the exchange's
//! compression before parsing. Heartbeats are recognized here so they never
//! reach the normalizer.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use serde_json::Value;

use crate::error::DecodeError;
use crate::exchanges::ExchangeProfile;
use crate::transport::Frame;

/// Compression applied to binary frames by an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zlib,
    /// Deflate stream without zlib header or trailer.
    RawDeflate,
}

/// Liveness marker recognized by an exchange profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Frame to answer a server-initiated ping with.
    pub reply: Option<Frame>,
}

impl Heartbeat {
    pub fn silent() -> Self {
        Self { reply: None }
    }

    pub fn reply_with(frame: Frame) -> Self {
        Self { reply: Some(frame) }
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Liveness signal. `reply` is sent back immediately when present.
    Heartbeat { reply: Option<Frame> },
    Message(Value),
}

/// Inflate (if needed) and return the frame's text.
pub fn frame_text(frame: &Frame, compression: Compression) -> Result<String, DecodeError> {
    match frame {
        Frame::Text(text) => Ok(text.clone()),
        Frame::Binary(bytes) => {
            let raw = inflate(bytes, compression)?;
            String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
        }
    }
}

fn inflate(bytes: &[u8], compression: Compression) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let result = match compression {
        Compression::None => return Ok(bytes.to_vec()),
        Compression::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
        Compression::Zlib => ZlibDecoder::new(bytes).read_to_end(&mut out),
        Compression::RawDeflate => DeflateDecoder::new(bytes).read_to_end(&mut out),
    };
    result.map_err(|e| DecodeError::Decompress(e.to_string()))?;
    Ok(out)
}

/// Decode a frame for the given exchange.
pub fn decode_frame(profile: &dyn ExchangeProfile, frame: &Frame) -> Result<Inbound, DecodeError> {
    let text = frame_text(frame, profile.compression())?;
    if text.trim() == "pong" {
        return Ok(Inbound::Heartbeat { reply: None });
    }

    let value: Value =
        serde_json::from_str(&text).map_err(|e| DecodeError::Json(e.to_string()))?;

    if let Some(heartbeat) = profile.detect_heartbeat(&value) {
        return Ok(Inbound::Heartbeat {
            reply: heartbeat.reply,
        });
    }
    Ok(Inbound::Message(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::profile_for;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression as Level;
    use serde_json::json;
    use std::io::Write;
    use types::ids::ExchangeId;

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Level::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    fn raw_deflate(text: &str) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Level::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_bare_pong_is_heartbeat() {
        let profile = profile_for(ExchangeId::Okex);
        let inbound = decode_frame(profile.as_ref(), &Frame::text("pong")).unwrap();
        assert_eq!(inbound, Inbound::Heartbeat { reply: None });
    }

    #[test]
    fn test_plain_json_message() {
        let profile = profile_for(ExchangeId::Bitfinex);
        let inbound = decode_frame(profile.as_ref(), &Frame::text("[5,\"hb\"]")).unwrap();
        assert_eq!(inbound, Inbound::Heartbeat { reply: None });

        let inbound = decode_frame(profile.as_ref(), &Frame::text("[5,1,2,3]")).unwrap();
        assert_eq!(inbound, Inbound::Message(json!([5, 1, 2, 3])));
    }

    #[test]
    fn test_gzip_ping_produces_reply() {
        let profile = profile_for(ExchangeId::Huobipro);
        let frame = Frame::Binary(gzip(r#"{"ping":1492420473027}"#));
        match decode_frame(profile.as_ref(), &frame).unwrap() {
            Inbound::Heartbeat { reply: Some(Frame::Text(text)) } => {
                let v: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["pong"], json!(1492420473027u64));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_raw_deflate_message() {
        let profile = profile_for(ExchangeId::Okex3);
        let frame = Frame::Binary(raw_deflate(r#"{"event":"subscribe","channel":"spot/ticker:BTC-USDT"}"#));
        let inbound = decode_frame(profile.as_ref(), &frame).unwrap();
        assert!(matches!(inbound, Inbound::Message(v) if v["event"] == "subscribe"));
    }

    #[test]
    fn test_raw_deflate_pong() {
        let profile = profile_for(ExchangeId::Okex3);
        let frame = Frame::Binary(raw_deflate("pong"));
        assert_eq!(
            decode_frame(profile.as_ref(), &frame).unwrap(),
            Inbound::Heartbeat { reply: None }
        );
    }

    #[test]
    fn test_zlib_inflate() {
        let mut enc = ZlibEncoder::new(Vec::new(), Level::default());
        enc.write_all(b"{\"a\":1}").unwrap();
        let bytes = enc.finish().unwrap();
        let text = frame_text(&Frame::Binary(bytes), Compression::Zlib).unwrap();
        assert_eq!(text, "{\"a\":1}");
    }

    #[test]
    fn test_corrupt_gzip_is_decode_error() {
        let profile = profile_for(ExchangeId::Huobipro);
        let result = decode_frame(profile.as_ref(), &Frame::Binary(vec![0x1f, 0x8b, 0xff, 0x00]));
        assert!(matches!(result, Err(DecodeError::Decompress(_))));
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let profile = profile_for(ExchangeId::Zb);
        let result = decode_frame(profile.as_ref(), &Frame::text("{not json"));
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_uncompressed_binary_utf8() {
        let profile = profile_for(ExchangeId::Gateio);
        let frame = Frame::Binary(br#"{"result":"pong","id":3,"error":null}"#.to_vec());
        assert_eq!(
            decode_frame(profile.as_ref(), &frame).unwrap(),
            Inbound::Heartbeat { reply: None }
        );

        let bad = Frame::Binary(vec![0xff, 0xfe]);
        assert!(matches!(
            decode_frame(profile.as_ref(), &bad),
            Err(DecodeError::InvalidUtf8)
        ));
    }
}
