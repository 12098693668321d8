//! Types library for the exchange feed normalizer
//!
//! This library provides the canonical market-data model every exchange
//! adapter normalizes into, with deterministic decimal numerics.
//!
//! # Modules
//! - `ids`: Instrument symbols and exchange identifiers
//! - `numeric`: Fixed-point decimal types (Price, Amount)
//! - `market`: Book levels, snapshots, deltas, trades, tickers
//! - `time`: Exchange timestamp conversion
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod market;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::market::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
