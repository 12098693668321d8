//! Error types for the canonical data model
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Numeric parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("Negative price: {0}")]
    NegativePrice(String),

    #[error("Negative amount: {0}")]
    NegativeAmount(String),

    #[error("Invalid count: {0}")]
    InvalidCount(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Identifier parsing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdError {
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),
}
