//! Shared close-price history
//!
//! The outcome tracker resolves predictions against historical closes.
//! This adapter accumulates the closes the service observes during the
//! day (price pushes, prediction submissions) behind the core's
//! `PriceSource` seam.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::sync::Arc;

use backtest_core::errors::CoreResult;
use backtest_core::market::{MemoryPriceSource, PriceSource};
use backtest_core::Ticker;

#[derive(Clone, Default)]
pub struct SharedPriceHistory {
    inner: Arc<RwLock<MemoryPriceSource>>,
}

impl SharedPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ticker: Ticker, date: NaiveDate, close: f64) {
        self.inner.write().insert(ticker, date, close);
    }
}

#[async_trait]
impl PriceSource for SharedPriceHistory {
    async fn close_on_or_before(
        &self,
        ticker: &Ticker,
        date: NaiveDate,
    ) -> CoreResult<Option<f64>> {
        Ok(self.inner.read().lookup(ticker, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_lookup() {
        let history = SharedPriceHistory::new();
        let ticker = Ticker::new("005930");
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        history.record(ticker.clone(), date, 73_000.0);

        let found = history.close_on_or_before(&ticker, date).await.unwrap();
        assert_eq!(found, Some(73_000.0));
    }
}
