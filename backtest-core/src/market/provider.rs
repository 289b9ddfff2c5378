//! Price lookup seam to the external data pipeline

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::errors::CoreResult;
use crate::market::types::Ticker;

/// Historical close-price lookup, implemented by the data pipeline.
///
/// A missing date is not an error: the nearest earlier trading day's close
/// is the agreed fallback, so implementations should answer
/// `close_on_or_before` rather than exact-date-only. `Ok(None)` means no
/// usable price exists at or before the requested date.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn close_on_or_before(
        &self,
        ticker: &Ticker,
        date: NaiveDate,
    ) -> CoreResult<Option<f64>>;
}

/// In-memory price history, for tests and embedded use.
#[derive(Default)]
pub struct MemoryPriceSource {
    history: HashMap<Ticker, Vec<(NaiveDate, f64)>>,
}

impl MemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a close price, keeping the per-ticker series date-ordered.
    pub fn insert(&mut self, ticker: Ticker, date: NaiveDate, close: f64) {
        let series = self.history.entry(ticker).or_default();
        match series.binary_search_by_key(&date, |(d, _)| *d) {
            Ok(idx) => series[idx] = (date, close),
            Err(idx) => series.insert(idx, (date, close)),
        }
    }

    /// Synchronous on-or-before lookup over the in-memory series.
    pub fn lookup(&self, ticker: &Ticker, date: NaiveDate) -> Option<f64> {
        let series = self.history.get(ticker)?;
        let idx = match series.binary_search_by_key(&date, |(d, _)| *d) {
            Ok(idx) => return Some(series[idx].1),
            Err(idx) => idx,
        };
        idx.checked_sub(1).map(|i| series[i].1)
    }
}

#[async_trait]
impl PriceSource for MemoryPriceSource {
    async fn close_on_or_before(
        &self,
        ticker: &Ticker,
        date: NaiveDate,
    ) -> CoreResult<Option<f64>> {
        Ok(self.lookup(ticker, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_exact_and_fallback_lookup() {
        let mut source = MemoryPriceSource::new();
        let ticker = Ticker::new("005930");
        source.insert(ticker.clone(), d(2024, 3, 4), 72000.0);
        source.insert(ticker.clone(), d(2024, 3, 5), 73500.0);

        // Exact date
        let price = source.close_on_or_before(&ticker, d(2024, 3, 5)).await.unwrap();
        assert_eq!(price, Some(73500.0));

        // Weekend rolls back to the prior close
        let price = source.close_on_or_before(&ticker, d(2024, 3, 9)).await.unwrap();
        assert_eq!(price, Some(73500.0));

        // Before any data
        let price = source.close_on_or_before(&ticker, d(2024, 3, 1)).await.unwrap();
        assert_eq!(price, None);

        // Unknown ticker
        let price = source
            .close_on_or_before(&Ticker::new("000660"), d(2024, 3, 5))
            .await
            .unwrap();
        assert_eq!(price, None);
    }
}
