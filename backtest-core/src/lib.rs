//! Paper-Trading & Risk-Analytics Engine
//!
//! Simulates an order-driven portfolio against a stream of directional
//! predictions under realistic frictions (commission, transaction tax,
//! position limits), tracks each prediction to its realized outcome, and
//! computes the performance and risk statistics that tell you whether the
//! prediction model is worth trusting.
//!
//! Data acquisition and the prediction model itself are external
//! collaborators: the engine consumes [`market::StockSnapshot`] and
//! prediction inputs, and reads historical closes through the
//! [`market::PriceSource`] trait.

pub mod analytics;
pub mod api;
pub mod errors;
pub mod market;
pub mod paper_trading;
pub mod store;
pub mod tracking;

// Re-export main types for easy access
pub use analytics::{MetricsPeriod, PerformanceAnalyzer, PerformanceMetrics, Report};
pub use errors::{CoreError, CoreResult, TradeError};
pub use market::{PriceSource, StockSnapshot, Ticker, TradingAction};
pub use paper_trading::{
    BacktestConfig, PaperTradingEngine, PortfolioSummary, SignalPolicy, Trade,
};
pub use store::BacktestStore;
pub use tracking::{OutcomeTracker, PredictedDirection, Prediction, PredictionLedger, PredictionStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tracking::ledger::PredictionFilter;

/// Prediction submission from the model-consuming caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictionInput {
    pub ticker: Ticker,
    pub predicted_direction: PredictedDirection,
    pub probability: f64,
    pub expected_return: f64,
    pub confidence: f64,
    pub current_price: f64,
    pub sector: Option<String>,
    pub model_version: Option<String>,
}

/// What happened to a submitted prediction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub prediction_id: i64,
    pub trade: Option<Trade>,
}

/// Main interface bundling the engine, ledger, tracker and analyzer for
/// routes and schedulers.
pub struct PaperTrader {
    engine: Arc<PaperTradingEngine>,
    ledger: PredictionLedger,
    tracker: OutcomeTracker,
    analyzer: PerformanceAnalyzer,
    config: BacktestConfig,
}

impl PaperTrader {
    /// Wires a full paper trader over one store. Fails fast on an invalid
    /// configuration, before any trading begins.
    pub async fn new(
        config: BacktestConfig,
        store: BacktestStore,
        prices: Arc<dyn PriceSource>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let engine = Arc::new(PaperTradingEngine::new(config.clone(), store.clone()).await?);
        let ledger = PredictionLedger::new(&store);
        let tracker = OutcomeTracker::new(
            ledger.clone(),
            prices,
            std::time::Duration::from_millis(config.price_lookup_timeout_ms),
        );
        let analyzer = PerformanceAnalyzer::new(store, &config);

        Ok(Self {
            engine,
            ledger,
            tracker,
            analyzer,
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<PaperTradingEngine> {
        &self.engine
    }

    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    /// Records a new prediction and runs it through the trading policy.
    pub async fn submit_prediction(
        &self,
        input: PredictionInput,
    ) -> CoreResult<SubmissionOutcome> {
        let mut prediction = Prediction::new(
            input.ticker.clone(),
            Utc::now(),
            input.predicted_direction,
            input.probability,
            input.expected_return,
            input.confidence,
        );
        prediction.base_price = Some(input.current_price);
        if let Some(version) = input.model_version {
            prediction.model_version = version;
        }

        let id = self.ledger.save(&prediction).await?;
        prediction.id = Some(id);

        if input.sector.is_some() {
            self.engine
                .observe_snapshot(&StockSnapshot {
                    ticker: input.ticker.clone(),
                    current_price: input.current_price,
                    price_history: Vec::new(),
                    sector: input.sector,
                })
                .await?;
        }

        let trade = self
            .engine
            .process_prediction(&input.ticker, &prediction, input.current_price)
            .await?;

        Ok(SubmissionOutcome {
            prediction_id: id,
            trade,
        })
    }

    pub async fn process_prediction(
        &self,
        ticker: &Ticker,
        prediction: &Prediction,
        current_price: f64,
    ) -> CoreResult<Option<Trade>> {
        self.engine.process_prediction(ticker, prediction, current_price).await
    }

    pub async fn update_portfolio_values(
        &self,
        current_prices: &HashMap<Ticker, f64>,
    ) -> CoreResult<()> {
        self.engine.update_portfolio_values(current_prices).await
    }

    pub fn get_portfolio_summary(&self) -> PortfolioSummary {
        self.engine.get_portfolio_summary()
    }

    pub fn current_prices(&self) -> HashMap<Ticker, f64> {
        self.engine.current_prices_map()
    }

    pub async fn close_position(&self, ticker: &Ticker, reason: &str) -> CoreResult<Option<Trade>> {
        self.engine.close_position(ticker, reason).await
    }

    pub async fn check_predictions(&self, days_after: u32) -> CoreResult<usize> {
        self.tracker.check_predictions(days_after).await
    }

    pub async fn cleanup_old_predictions(&self) -> CoreResult<(u64, u64)> {
        self.tracker
            .cleanup_old_predictions(self.config.data_retention_days)
            .await
    }

    pub async fn prediction(&self, id: i64) -> CoreResult<Option<Prediction>> {
        self.ledger.get(id).await
    }

    pub async fn recent_predictions(
        &self,
        ticker: Option<Ticker>,
        status: Option<PredictionStatus>,
        limit: i64,
    ) -> CoreResult<Vec<Prediction>> {
        self.ledger
            .recent(&PredictionFilter {
                ticker,
                status,
                limit,
            })
            .await
    }

    pub async fn calculate_performance_metrics(
        &self,
        period: MetricsPeriod,
    ) -> CoreResult<PerformanceMetrics> {
        self.analyzer.calculate_performance_metrics(period).await
    }

    pub async fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Report> {
        self.analyzer.generate_report(start, end).await
    }

    pub async fn compare_periods(
        &self,
        period1: (DateTime<Utc>, DateTime<Utc>),
        period2: (DateTime<Utc>, DateTime<Utc>),
    ) -> CoreResult<analytics::ComparisonReport> {
        self.analyzer.compare_periods(period1, period2).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market::MemoryPriceSource;

    #[tokio::test]
    async fn test_submit_prediction_end_to_end() {
        let store = BacktestStore::connect("sqlite::memory:").await.unwrap();
        let trader = PaperTrader::new(
            BacktestConfig::default(),
            store,
            Arc::new(MemoryPriceSource::new()),
        )
        .await
        .unwrap();

        let outcome = trader
            .submit_prediction(PredictionInput {
                ticker: Ticker::new("005930"),
                predicted_direction: PredictedDirection::Up,
                probability: 0.72,
                expected_return: 1.5,
                confidence: 0.8,
                current_price: 50_000.0,
                sector: Some("전자".to_string()),
                model_version: None,
            })
            .await
            .unwrap();

        assert!(outcome.prediction_id > 0);
        let trade = outcome.trade.expect("strong signal should trade");
        assert_eq!(trade.prediction_id, Some(outcome.prediction_id));

        let saved = trader.ledger().get(outcome.prediction_id).await.unwrap().unwrap();
        assert_eq!(saved.status, PredictionStatus::Pending);
        assert_eq!(saved.base_price, Some(50_000.0));

        let summary = trader.get_portfolio_summary();
        assert_eq!(summary.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_report_on_empty_store_is_no_data_not_error() {
        let store = BacktestStore::connect("sqlite::memory:").await.unwrap();
        let trader = PaperTrader::new(
            BacktestConfig::default(),
            store,
            Arc::new(MemoryPriceSource::new()),
        )
        .await
        .unwrap();

        let report = trader
            .generate_report(Utc::now() - chrono::Duration::days(30), Utc::now())
            .await
            .unwrap();

        assert!(report.risk_metrics.no_data);
        assert_eq!(report.risk_metrics.metrics.sharpe_ratio, 0.0);
        assert_eq!(report.trading_performance.total_trades, 0);
    }
}
