//! Error taxonomy for the feed engine
//!
//! Decode and routing failures never terminate a session; they are logged and
//! the offending frame is dropped. Transport failures and exchange rejections
//! are surfaced to the consumer as `SessionEvent::Error`.

use serde_json::Value;
use thiserror::Error;
use types::errors::NumericError;

/// Failure to turn a raw frame or payload into something usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Numeric(#[from] NumericError),
}

/// Errors raised by a feed session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no subscription for route {0}")]
    UnroutableMessage(String),

    #[error("no liveness signal for {elapsed_ms} ms")]
    LivenessTimeout { elapsed_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("subscription rejected: {0}")]
    SubscriptionRejected(Value),

    #[error("session task has stopped")]
    SessionStopped,
}

impl From<NumericError> for FeedError {
    fn from(err: NumericError) -> Self {
        FeedError::Decode(DecodeError::Numeric(err))
    }
}
