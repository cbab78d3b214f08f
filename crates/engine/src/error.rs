//! Engine error taxonomy
//!
//! Everything except `ExternalData` is surfaced verbatim to the caller.
//! `ExternalData` is consumed inside the price feed, which substitutes a
//! synthetic series instead.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("sell cap exceeded: at most {0} SELL rounds per contest")]
    SellCapExceeded(u32),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external data unavailable: {0}")]
    ExternalData(String),

    #[error("corrupt document at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] persistence::DbError),
}

pub type EngineResult<T> = Result<T, EngineError>;
