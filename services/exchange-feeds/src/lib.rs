//! Exchange Feed Normalization Engine
//!
//! Connects to cryptocurrency exchange WebSocket feeds and turns their
//! divergent wire formats into one canonical stream of order-book deltas,
//! trades and tickers.
//!
//! # Architecture
//!
//! ```text
//!  WebSocket frame
//!        │
//!   ┌────▼────┐
//!   │ Decoder │  ← inflate, JSON-parse, short-circuit heartbeats
//!   └────┬────┘
//!        │
//!   ┌────▼─────┐
//!   │ Registry │  ← route by channel key or exchange alias
//!   └────┬─────┘
//!        │
//!   ┌────▼──────┐    ┌────────────┐
//!   │ Normalize │───►│ Reconciler │  ← snapshot-only books
//!   └────┬──────┘    └─────┬──────┘
//!        │                 │
//!   ┌────▼─────────────────▼──┐
//!   │     Session events      │
//!   └─────────────────────────┘
//! ```
//!
//! Everything exchange-specific lives in [`exchanges`], one
//! [`ExchangeProfile`](exchanges::ExchangeProfile) per venue.

pub mod config;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod exchanges;
pub mod liveness;
pub mod logging;
pub mod normalize;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod transport;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
