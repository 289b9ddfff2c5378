//! Instrument and market data types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CoreError, CoreResult};

/// Instrument ticker
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticker(pub String);

impl Ticker {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn validate(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '^')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading decision for a single instrument
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradingAction {
    Buy,
    Sell,
    Hold,
}

impl TradingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for TradingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Daily OHLCV bar
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Point-in-time view of one instrument, produced by the data pipeline.
///
/// The core trusts `current_price > 0`; anything else is rejected at this
/// boundary before it can reach portfolio math.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub ticker: Ticker,
    pub current_price: f64,
    pub price_history: Vec<Candle>,
    pub sector: Option<String>,
}

impl StockSnapshot {
    pub fn validate(&self) -> CoreResult<()> {
        if !self.ticker.validate() {
            return Err(CoreError::DataValidation(format!(
                "invalid ticker: {:?}",
                self.ticker.0
            )));
        }
        if !(self.current_price > 0.0) || !self.current_price.is_finite() {
            return Err(CoreError::DataValidation(format!(
                "non-positive current price for {}: {}",
                self.ticker, self.current_price
            )));
        }
        Ok(())
    }
}

/// Validates a model-supplied probability or confidence value.
pub fn validate_unit_interval(name: &str, value: f64) -> CoreResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CoreError::DataValidation(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_validation() {
        assert!(Ticker::new("005930.KS").validate());
        assert!(Ticker::new("AAPL").validate());
        assert!(Ticker::new("^KS11").validate());
        assert!(!Ticker::new("").validate());
        assert!(!Ticker::new("BAD TICKER").validate());
    }

    #[test]
    fn test_snapshot_rejects_non_positive_price() {
        let snap = StockSnapshot {
            ticker: Ticker::new("005930"),
            current_price: 0.0,
            price_history: Vec::new(),
            sector: None,
        };
        assert!(snap.validate().is_err());
    }

    #[test]
    fn test_unit_interval_bounds() {
        assert!(validate_unit_interval("probability", 0.0).is_ok());
        assert!(validate_unit_interval("probability", 1.0).is_ok());
        assert!(validate_unit_interval("probability", 1.01).is_err());
        assert!(validate_unit_interval("confidence", f64::NAN).is_err());
    }
}
