//! Core error types

use thiserror::Error;

/// Errors raised while applying a trade to the portfolio.
///
/// These are caller-recoverable: they mean the sizing or policy layer
/// proposed a trade the ledger cannot honor, and the engine treats them
/// as logged no-ops rather than batch failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("insufficient cash: need {required:.2}, have {available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("insufficient shares of {ticker}: tried to sell {requested}, holding {held}")]
    InsufficientShares {
        ticker: String,
        requested: i64,
        held: i64,
    },

    #[error("invalid trade input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("trade rejected: {0}")]
    Trade(#[from] TradeError),

    #[error("data validation failed: {0}")]
    DataValidation(String),

    #[error("price lookup failed for {ticker} on {date}")]
    PriceLookup { ticker: String, date: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorSeverity {
    /// Skip the item, continue the batch.
    Recoverable,
    /// Retry on the next scheduled cycle.
    Transient,
    /// Abort the current tick; state must not advance.
    Fatal,
}

impl CoreError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Trade(_) | Self::DataValidation(_) => ErrorSeverity::Recoverable,
            Self::PriceLookup { .. } | Self::Timeout(_) => ErrorSeverity::Transient,
            Self::Config(_) | Self::Storage(_) => ErrorSeverity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Fatal)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
