//! Portfolio state: cash, positions and derived valuation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::market::types::Ticker;

/// Open position in a single instrument.
///
/// Owned exclusively by [`PortfolioState`]; created on first BUY, removed
/// when a SELL takes the quantity to exactly zero. `avg_price * quantity`
/// tracks `total_cost` within floating tolerance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticker: Ticker,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub total_cost: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn open(ticker: Ticker, quantity: i64, price: f64) -> Self {
        Self {
            ticker,
            quantity,
            avg_price: price,
            current_price: price,
            total_cost: price * quantity as f64,
            unrealized_pnl: 0.0,
        }
    }

    /// Refreshes the mark and unrealized P&L.
    pub fn update_mark(&mut self, current_price: f64) {
        self.current_price = current_price;
        self.unrealized_pnl = (current_price - self.avg_price) * self.quantity as f64;
    }

    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    /// Unrealized return relative to cost basis, as a fraction.
    pub fn pnl_pct(&self) -> f64 {
        if self.avg_price > 0.0 {
            (self.current_price - self.avg_price) / self.avg_price
        } else {
            0.0
        }
    }
}

/// Cumulative trading statistics derived from the closed-trade history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PortfolioStatistics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

/// The single mutable portfolio aggregate.
///
/// All mutation funnels through the trade executor and engine; nothing
/// outside this module's owner pokes positions directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub positions: HashMap<Ticker, Position>,
    pub total_value: f64,
    pub initial_capital: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub stats: PortfolioStatistics,
    pub last_updated: DateTime<Utc>,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: HashMap::new(),
            total_value: initial_capital,
            initial_capital,
            total_return: 0.0,
            total_return_pct: 0.0,
            stats: PortfolioStatistics::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn position(&self, ticker: &Ticker) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn held_quantity(&self, ticker: &Ticker) -> i64 {
        self.positions.get(ticker).map_or(0, |p| p.quantity)
    }

    /// Applies current prices to every held position and recomputes the
    /// derived valuation fields. Unknown tickers keep their last mark.
    pub fn apply_marks(&mut self, current_prices: &HashMap<Ticker, f64>) {
        for (ticker, position) in self.positions.iter_mut() {
            if let Some(price) = current_prices.get(ticker) {
                position.update_mark(*price);
            }
        }
        self.recompute_valuation();
    }

    /// Recomputes `total_value = cash + Σ quantity × current_price` and the
    /// return fields. Call after any position or cash change.
    pub fn recompute_valuation(&mut self) {
        let positions_value: f64 = self.positions.values().map(Position::market_value).sum();
        self.total_value = self.cash + positions_value;
        self.total_return = self.total_value - self.initial_capital;
        self.total_return_pct = self.total_return / self.initial_capital * 100.0;
        self.last_updated = Utc::now();
    }

    /// Restores cash/positions/valuation from a durable snapshot.
    pub fn restore(&mut self, snapshot: &PortfolioSnapshot) {
        self.cash = snapshot.cash;
        self.positions = snapshot.positions.clone();
        self.total_value = snapshot.total_value;
        self.total_return = self.total_value - self.initial_capital;
        self.total_return_pct = self.total_return / self.initial_capital * 100.0;
        self.last_updated = snapshot.date;
    }
}

/// Durable point-in-time checkpoint, one per trading tick.
///
/// Return and drawdown fields are fractions; scaling to percent happens
/// only at the reporting boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: Option<i64>,
    pub date: DateTime<Utc>,
    pub cash: f64,
    pub positions: HashMap<Ticker, Position>,
    pub total_value: f64,
    pub daily_return: f64,
    pub cumulative_return: f64,
    pub drawdown: f64,
}

impl PortfolioSnapshot {
    /// Builds the next checkpoint from the live state plus the previous
    /// tick's value and the running peak.
    pub fn capture(
        state: &PortfolioState,
        date: DateTime<Utc>,
        prev_total_value: f64,
        peak_value: f64,
    ) -> Self {
        let daily_return = if prev_total_value > 0.0 {
            (state.total_value - prev_total_value) / prev_total_value
        } else {
            0.0
        };
        let peak = peak_value.max(state.total_value);
        let drawdown = if peak > 0.0 {
            (state.total_value - peak) / peak
        } else {
            0.0
        };
        Self {
            id: None,
            date,
            cash: state.cash,
            positions: state.positions.clone(),
            total_value: state.total_value,
            daily_return,
            cumulative_return: (state.total_value - state.initial_capital)
                / state.initial_capital,
            drawdown,
        }
    }
}

/// Read-only view served to the API layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub positions: Vec<PositionSummary>,
    pub total_value: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionSummary {
    pub ticker: Ticker,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub pnl_pct: f64,
}

impl PortfolioSummary {
    pub fn from_state(state: &PortfolioState) -> Self {
        let mut positions: Vec<PositionSummary> = state
            .positions
            .values()
            .map(|p| PositionSummary {
                ticker: p.ticker.clone(),
                quantity: p.quantity,
                avg_price: p.avg_price,
                current_price: p.current_price,
                unrealized_pnl: p.unrealized_pnl,
                pnl_pct: p.pnl_pct() * 100.0,
            })
            .collect();
        positions.sort_by(|a, b| a.ticker.as_str().cmp(b.ticker.as_str()));

        Self {
            cash: state.cash,
            positions,
            total_value: state.total_value,
            total_return: state.total_return,
            total_return_pct: state.total_return_pct,
            win_rate: state.stats.win_rate,
            sharpe_ratio: state.stats.sharpe_ratio,
            max_drawdown: state.stats.max_drawdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valuation_identity() {
        let mut state = PortfolioState::new(1_000_000.0);
        state.cash = 400_000.0;
        state.positions.insert(
            Ticker::new("005930"),
            Position::open(Ticker::new("005930"), 10, 50_000.0),
        );
        state.positions.insert(
            Ticker::new("000660"),
            Position::open(Ticker::new("000660"), 2, 50_000.0),
        );

        let mut prices = HashMap::new();
        prices.insert(Ticker::new("005930"), 52_000.0);
        prices.insert(Ticker::new("000660"), 48_000.0);
        state.apply_marks(&prices);

        let expected = 400_000.0 + 10.0 * 52_000.0 + 2.0 * 48_000.0;
        assert!((state.total_value - expected).abs() < 1e-6);
    }

    #[test]
    fn test_position_cost_basis_tracks_quantity() {
        let position = Position::open(Ticker::new("005930"), 100, 50_000.0);
        assert!((position.avg_price * position.quantity as f64 - position.total_cost).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut state = PortfolioState::new(10_000_000.0);
        state.cash = 4_999_250.0;
        state.positions.insert(
            Ticker::new("005930"),
            Position::open(Ticker::new("005930"), 100, 50_000.0),
        );
        state.recompute_valuation();

        let snapshot = PortfolioSnapshot::capture(&state, Utc::now(), state.total_value, 0.0);
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: PortfolioSnapshot = serde_json::from_str(&encoded).unwrap();

        let mut restored = PortfolioState::new(10_000_000.0);
        restored.restore(&decoded);

        assert_eq!(restored.cash, state.cash);
        assert_eq!(restored.total_value, state.total_value);
        assert_eq!(restored.positions, state.positions);
    }

    #[test]
    fn test_snapshot_drawdown_against_running_peak() {
        let mut state = PortfolioState::new(100.0);
        state.cash = 90.0;
        state.recompute_valuation();

        let snapshot = PortfolioSnapshot::capture(&state, Utc::now(), 110.0, 110.0);
        assert!((snapshot.drawdown - (90.0 - 110.0) / 110.0).abs() < 1e-9);
        assert!((snapshot.daily_return - (90.0 - 110.0) / 110.0).abs() < 1e-9);
    }
}
