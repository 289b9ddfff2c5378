//! Paper trading engine
//!
//! Single writer per portfolio: every state mutation runs under one
//! `tokio::sync::Mutex` held across the whole read-modify-write, because
//! commission and position math span multiple reads before any write.
//! Signal evaluation for different tickers may fan out; it funnels back
//! through this engine before touching cash or positions.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analytics::risk;
use crate::errors::{CoreError, CoreResult};
use crate::market::types::{StockSnapshot, Ticker, TradingAction};
use crate::paper_trading::config::BacktestConfig;
use crate::paper_trading::executor::{Trade, TradeExecutor};
use crate::paper_trading::policy::SignalPolicy;
use crate::paper_trading::portfolio::{PortfolioSnapshot, PortfolioState, PortfolioSummary};
use crate::store::BacktestStore;
use crate::tracking::ledger::Prediction;

/// Rolling window for the portfolio's Sharpe statistic.
const SHARPE_WINDOW: i64 = 252;

pub struct PaperTradingEngine {
    config: BacktestConfig,
    executor: TradeExecutor,
    store: BacktestStore,
    state: Mutex<PortfolioState>,
    current_prices: Arc<DashMap<Ticker, f64>>,
    summary: RwLock<PortfolioSummary>,
}

impl PaperTradingEngine {
    /// Builds an engine, failing fast on invalid configuration and
    /// restoring `{cash, positions, total_value}` from the most recent
    /// durable snapshot when one exists.
    pub async fn new(config: BacktestConfig, store: BacktestStore) -> CoreResult<Self> {
        config.validate()?;

        let mut state = PortfolioState::new(config.initial_capital);
        if let Some(snapshot) = store.latest_snapshot().await? {
            state.restore(&snapshot);
            info!(
                cash = state.cash,
                positions = state.positions.len(),
                total_value = state.total_value,
                "portfolio_restored"
            );
        } else {
            info!(initial_capital = config.initial_capital, "portfolio_initialized");
        }

        let executor = TradeExecutor::new(&config);
        let summary = RwLock::new(PortfolioSummary::from_state(&state));

        Ok(Self {
            config,
            executor,
            store,
            state: Mutex::new(state),
            current_prices: Arc::new(DashMap::new()),
            summary,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Records an instrument sighting: refreshes the price cache and the
    /// sector mapping used by the analyzer.
    pub async fn observe_snapshot(&self, snapshot: &StockSnapshot) -> CoreResult<()> {
        snapshot.validate()?;
        self.current_prices
            .insert(snapshot.ticker.clone(), snapshot.current_price);
        self.store
            .upsert_instrument(&snapshot.ticker, snapshot.sector.as_deref())
            .await
    }

    /// The single entry point mutating portfolio state during live
    /// operation. Decides, sizes and executes one prediction; returns the
    /// resulting trade, or None when nothing fired.
    ///
    /// Trade-level rejections (insufficient cash/shares) mean the policy
    /// proposed something the ledger cannot honor; they are logged and
    /// swallowed so one ticker's failure never aborts a batch.
    pub async fn process_prediction(
        &self,
        ticker: &Ticker,
        prediction: &Prediction,
        current_price: f64,
    ) -> CoreResult<Option<Trade>> {
        if !(current_price > 0.0) || !current_price.is_finite() {
            return Err(CoreError::DataValidation(format!(
                "non-positive price for {ticker}: {current_price}"
            )));
        }
        prediction.validate()?;

        self.current_prices.insert(ticker.clone(), current_price);

        let mut guard = self.state.lock().await;

        let decision = SignalPolicy::decide(
            prediction.probability,
            prediction.confidence,
            guard.position(ticker),
            &self.config,
        );
        if decision.action == TradingAction::Hold {
            return Ok(None);
        }

        if decision.action == TradingAction::Buy
            && guard.positions.len() >= self.config.max_positions
            && !guard.positions.contains_key(ticker)
        {
            warn!(
                ticker = %ticker,
                open_positions = guard.positions.len(),
                "max_positions_reached"
            );
            return Ok(None);
        }

        let quantity = SignalPolicy::size(
            decision.action,
            guard.held_quantity(ticker),
            current_price,
            &guard,
            &self.config,
        );
        if quantity == 0 {
            return Ok(None);
        }

        match self
            .apply_trade(
                &mut guard,
                ticker,
                decision.action,
                current_price,
                quantity,
                prediction.id,
            )
            .await
        {
            Ok(trade) => {
                info!(
                    ticker = %ticker,
                    action = %trade.action,
                    reason = ?decision.reason,
                    quantity = trade.quantity,
                    price = trade.price,
                    realized_pnl = trade.realized_pnl,
                    "trade_executed"
                );
                Ok(Some(trade))
            }
            Err(CoreError::Trade(e)) => {
                warn!(ticker = %ticker, error = %e, "trade_rejected");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Manual full liquidation of one position, bypassing the policy.
    pub async fn close_position(&self, ticker: &Ticker, reason: &str) -> CoreResult<Option<Trade>> {
        let mut guard = self.state.lock().await;

        let Some(position) = guard.position(ticker) else {
            return Ok(None);
        };
        let price = position.current_price;
        let quantity = position.quantity;

        let trade = self
            .apply_trade(&mut guard, ticker, TradingAction::Sell, price, quantity, None)
            .await?;

        info!(ticker = %ticker, reason, realized_pnl = trade.realized_pnl, "position_closed");
        Ok(Some(trade))
    }

    /// Marks every position to the supplied prices, recomputes the
    /// valuation and checkpoints a snapshot. The snapshot write is the
    /// durability boundary: in-memory state only advances with it.
    pub async fn update_portfolio_values(
        &self,
        current_prices: &HashMap<Ticker, f64>,
    ) -> CoreResult<()> {
        for (ticker, price) in current_prices {
            self.current_prices.insert(ticker.clone(), *price);
        }

        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.apply_marks(current_prices);

        self.checkpoint(&next).await?;
        self.refresh_statistics(&mut next).await?;

        *guard = next;
        *self.summary.write() = PortfolioSummary::from_state(&guard);
        Ok(())
    }

    /// Idempotent read of the current portfolio summary.
    pub fn get_portfolio_summary(&self) -> PortfolioSummary {
        self.summary.read().clone()
    }

    pub fn current_price(&self, ticker: &Ticker) -> Option<f64> {
        self.current_prices.get(ticker).map(|p| *p)
    }

    /// Copy of the live price cache, for revaluation ticks.
    pub fn current_prices_map(&self) -> HashMap<Ticker, f64> {
        self.current_prices
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Executes and durably records one trade.
    ///
    /// Runs against a clone of the state; the clone only replaces the
    /// live state after the trade row and snapshot are persisted, so a
    /// storage failure leaves memory exactly as it was.
    async fn apply_trade(
        &self,
        guard: &mut PortfolioState,
        ticker: &Ticker,
        action: TradingAction,
        price: f64,
        quantity: i64,
        prediction_id: Option<i64>,
    ) -> CoreResult<Trade> {
        let mut next = guard.clone();
        let mut trade = self.executor.execute(
            &mut next,
            ticker,
            action,
            price,
            quantity,
            prediction_id,
            Utc::now(),
        )?;

        let row_id = self.store.insert_trade(&trade).await?;
        trade.id = Some(row_id);

        self.checkpoint(&next).await?;
        self.refresh_statistics(&mut next).await?;

        *guard = next;
        *self.summary.write() = PortfolioSummary::from_state(guard);
        Ok(trade)
    }

    /// Appends a portfolio snapshot for the given state.
    async fn checkpoint(&self, state: &PortfolioState) -> CoreResult<()> {
        let prev_value = self
            .store
            .latest_snapshot()
            .await?
            .map(|s| s.total_value)
            .unwrap_or(state.initial_capital);
        let peak = self
            .store
            .peak_total_value()
            .await?
            .unwrap_or(state.initial_capital);

        let snapshot = PortfolioSnapshot::capture(state, Utc::now(), prev_value, peak);
        self.store.insert_snapshot(&snapshot).await?;
        Ok(())
    }

    /// Recomputes the cumulative statistics from the durable history:
    /// win/loss splits over closed trades, rolling Sharpe over up to 252
    /// snapshots, deepest recorded drawdown.
    async fn refresh_statistics(&self, state: &mut PortfolioState) -> CoreResult<()> {
        let closed = self.store.closed_trade_stats().await?;
        state.stats.total_trades = closed.total;
        state.stats.winning_trades = closed.wins;
        state.stats.losing_trades = closed.losses;
        state.stats.avg_win = closed.avg_win;
        state.stats.avg_loss = closed.avg_loss;
        state.stats.win_rate = if closed.total > 0 {
            closed.wins as f64 / closed.total as f64
        } else {
            0.0
        };

        let returns = self.store.recent_daily_returns(SHARPE_WINDOW).await?;
        state.stats.sharpe_ratio = risk::sharpe_ratio(&returns, self.config.risk_free_rate);
        state.stats.max_drawdown = self.store.min_drawdown().await?;
        Ok(())
    }
}
