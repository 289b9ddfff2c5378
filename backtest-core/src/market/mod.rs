//! Market data types consumed from external collaborators

pub mod provider;
pub mod types;

pub use provider::{MemoryPriceSource, PriceSource};
pub use types::{Candle, StockSnapshot, Ticker, TradingAction};
