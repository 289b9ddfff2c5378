//! Resolves pending predictions against realized prices

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{CoreError, CoreResult};
use crate::market::provider::PriceSource;
use crate::market::types::Ticker;
use crate::tracking::ledger::{
    Horizon, PredictedDirection, Prediction, PredictionLedger, PredictionStatus,
};

/// How many price lookups run concurrently per check pass. Lookups are
/// I/O-bound and write to independent rows, so fan-out is safe.
const LOOKUP_CONCURRENCY: usize = 8;

/// Rolls a weekend date forward to the next business day.
pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut date = date;
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    date
}

/// Checks pending predictions against realized close prices at the fixed
/// 1/3/7-day horizons. Status is decided on the 1-day horizon only; later
/// horizons record their returns without reopening the classification.
pub struct OutcomeTracker {
    ledger: PredictionLedger,
    prices: Arc<dyn PriceSource>,
    lookup_timeout: std::time::Duration,
}

impl OutcomeTracker {
    pub fn new(
        ledger: PredictionLedger,
        prices: Arc<dyn PriceSource>,
        lookup_timeout: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            prices,
            lookup_timeout,
        }
    }

    /// Resolves every prediction whose `days_after` horizon has elapsed.
    /// Returns how many predictions were checked. Lookup failures leave
    /// the row untouched for the next scheduled pass.
    pub async fn check_predictions(&self, days_after: u32) -> CoreResult<usize> {
        let horizon = Horizon::from_days(days_after).ok_or_else(|| {
            CoreError::Config(format!("unsupported check horizon: {days_after} days"))
        })?;

        let now = Utc::now();
        let due_before = now - Duration::days(horizon.days());
        let due = self.ledger.awaiting_horizon(horizon, due_before).await?;

        if due.is_empty() {
            return Ok(0);
        }

        info!(
            horizon_days = horizon.days(),
            candidates = due.len(),
            "outcome_check_started"
        );

        let checked = Arc::new(AtomicUsize::new(0));
        let today = now.date_naive();

        stream::iter(due)
            .for_each_concurrent(LOOKUP_CONCURRENCY, |prediction| {
                let checked = checked.clone();
                async move {
                    match self.check_one(&prediction, horizon, today, now).await {
                        Ok(true) => {
                            checked.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                ticker = %prediction.ticker,
                                prediction_id = prediction.id,
                                error = %e,
                                "outcome_check_failed"
                            );
                        }
                    }
                }
            })
            .await;

        let checked = checked.load(Ordering::Relaxed);
        info!(horizon_days = horizon.days(), checked, "outcome_check_completed");
        Ok(checked)
    }

    async fn check_one(
        &self,
        prediction: &Prediction,
        horizon: Horizon,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let Some(id) = prediction.id else {
            return Ok(false);
        };

        let target_date =
            next_business_day(prediction.prediction_date.date_naive() + Duration::days(horizon.days()));
        if target_date > today {
            return Ok(false);
        }

        let base_price = match prediction.base_price {
            Some(price) if price > 0.0 => price,
            _ => self
                .lookup(&prediction.ticker, prediction.prediction_date.date_naive())
                .await?
                .ok_or_else(|| CoreError::PriceLookup {
                    ticker: prediction.ticker.to_string(),
                    date: prediction.prediction_date.date_naive().to_string(),
                })?,
        };

        let actual_price = self
            .lookup(&prediction.ticker, target_date)
            .await?
            .ok_or_else(|| CoreError::PriceLookup {
                ticker: prediction.ticker.to_string(),
                date: target_date.to_string(),
            })?;

        let actual_return = (actual_price - base_price) / base_price * 100.0;

        self.ledger
            .record_outcome(id, horizon, actual_price, actual_return, now)
            .await?;

        // Classification locks in at the 1-day horizon.
        if horizon == Horizon::OneDay && prediction.status == PredictionStatus::Pending {
            let was_up = actual_return > 0.0;
            let correct = (prediction.predicted_direction == PredictedDirection::Up) == was_up;
            let status = if correct {
                PredictionStatus::Correct
            } else {
                PredictionStatus::Incorrect
            };
            self.ledger.finalize_status(id, status).await?;

            info!(
                ticker = %prediction.ticker,
                prediction_id = id,
                actual_return,
                status = %status,
                "prediction_resolved"
            );
        }

        Ok(true)
    }

    async fn lookup(&self, ticker: &Ticker, date: NaiveDate) -> CoreResult<Option<f64>> {
        tokio::time::timeout(self.lookup_timeout, self.prices.close_on_or_before(ticker, date))
            .await
            .map_err(|_| CoreError::Timeout(format!("price lookup for {ticker} on {date}")))?
    }

    /// Retention pass over the ledger (see `PredictionLedger::cleanup`).
    pub async fn cleanup_old_predictions(&self, retention_days: i64) -> CoreResult<(u64, u64)> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let (purged, expired) = self.ledger.cleanup(cutoff).await?;
        if purged > 0 || expired > 0 {
            info!(purged, expired, "prediction_retention_pass");
        }
        Ok((purged, expired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::provider::MemoryPriceSource;
    use crate::market::types::Ticker;
    use crate::store::BacktestStore;

    fn d(date: DateTime<Utc>) -> NaiveDate {
        date.date_naive()
    }

    async fn setup() -> (BacktestStore, PredictionLedger) {
        let store = BacktestStore::connect("sqlite::memory:").await.unwrap();
        let ledger = PredictionLedger::new(&store);
        (store, ledger)
    }

    fn tracker_with(ledger: PredictionLedger, prices: MemoryPriceSource) -> OutcomeTracker {
        OutcomeTracker::new(ledger, Arc::new(prices), std::time::Duration::from_secs(1))
    }

    fn prediction(days_ago: i64, direction: PredictedDirection, base: f64) -> Prediction {
        let mut p = Prediction::new(
            Ticker::new("005930"),
            Utc::now() - Duration::days(days_ago),
            direction,
            0.7,
            1.0,
            0.8,
        );
        p.base_price = Some(base);
        p
    }

    #[test]
    fn test_weekend_rolls_to_monday() {
        let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(next_business_day(saturday), monday);
        assert_eq!(next_business_day(monday), monday);
    }

    #[tokio::test]
    async fn test_one_day_check_finalizes_status() {
        let (_store, ledger) = setup().await;
        let id = ledger
            .save(&prediction(3, PredictedDirection::Up, 50_000.0))
            .await
            .unwrap();

        let mut prices = MemoryPriceSource::new();
        let target = next_business_day(d(Utc::now() - Duration::days(3)) + Duration::days(1));
        prices.insert(Ticker::new("005930"), target, 51_500.0);

        let tracker = tracker_with(ledger.clone(), prices);
        let checked = tracker.check_predictions(1).await.unwrap();
        assert_eq!(checked, 1);

        let resolved = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(resolved.status, PredictionStatus::Correct);
        assert!((resolved.actual_return_1d.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(resolved.actual_price_1d, Some(51_500.0));
        assert!(resolved.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_wrong_direction_is_incorrect() {
        let (_store, ledger) = setup().await;
        let id = ledger
            .save(&prediction(3, PredictedDirection::Down, 50_000.0))
            .await
            .unwrap();

        let mut prices = MemoryPriceSource::new();
        let target = next_business_day(d(Utc::now() - Duration::days(3)) + Duration::days(1));
        prices.insert(Ticker::new("005930"), target, 51_000.0);

        let tracker = tracker_with(ledger.clone(), prices);
        tracker.check_predictions(1).await.unwrap();

        let resolved = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(resolved.status, PredictionStatus::Incorrect);
    }

    #[tokio::test]
    async fn test_late_horizon_never_retriggers_status() {
        let (_store, ledger) = setup().await;
        let id = ledger
            .save(&prediction(10, PredictedDirection::Up, 50_000.0))
            .await
            .unwrap();

        let base_date = d(Utc::now() - Duration::days(10));
        let mut prices = MemoryPriceSource::new();
        // Up on day 1, down by day 3: status must stay Correct.
        prices.insert(
            Ticker::new("005930"),
            next_business_day(base_date + Duration::days(1)),
            51_000.0,
        );
        prices.insert(
            Ticker::new("005930"),
            next_business_day(base_date + Duration::days(3)),
            48_000.0,
        );

        let tracker = tracker_with(ledger.clone(), prices);
        tracker.check_predictions(1).await.unwrap();
        tracker.check_predictions(3).await.unwrap();

        let resolved = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(resolved.status, PredictionStatus::Correct);
        assert!(resolved.actual_return_3d.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn test_missing_price_leaves_prediction_pending() {
        let (_store, ledger) = setup().await;
        let id = ledger
            .save(&prediction(3, PredictedDirection::Up, 50_000.0))
            .await
            .unwrap();

        // No price data at all: lookup fails, row stays pending for retry.
        let tracker = tracker_with(ledger.clone(), MemoryPriceSource::new());
        let checked = tracker.check_predictions(1).await.unwrap();
        assert_eq!(checked, 0);

        let unresolved = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(unresolved.status, PredictionStatus::Pending);
        assert!(unresolved.actual_return_1d.is_none());
    }

    #[tokio::test]
    async fn test_not_yet_due_is_skipped() {
        let (_store, ledger) = setup().await;
        ledger
            .save(&prediction(0, PredictedDirection::Up, 50_000.0))
            .await
            .unwrap();

        let tracker = tracker_with(ledger, MemoryPriceSource::new());
        let checked = tracker.check_predictions(1).await.unwrap();
        assert_eq!(checked, 0);
    }

    #[tokio::test]
    async fn test_unsupported_horizon_is_config_error() {
        let (_store, ledger) = setup().await;
        let tracker = tracker_with(ledger, MemoryPriceSource::new());
        assert!(tracker.check_predictions(2).await.is_err());
    }
}
