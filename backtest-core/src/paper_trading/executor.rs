//! Trade execution against the portfolio ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::TradeError;
use crate::market::types::{Ticker, TradingAction};
use crate::paper_trading::config::BacktestConfig;
use crate::paper_trading::portfolio::{PortfolioState, Position};

/// Immutable record of one executed trade. Append-only ledger entry;
/// `id` is assigned by the store on insert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    /// In-process correlation id, stable before the row id exists.
    pub ref_id: String,
    pub prediction_id: Option<i64>,
    pub ticker: Ticker,
    pub action: TradingAction,
    pub trade_date: DateTime<Utc>,
    pub price: f64,
    pub quantity: i64,
    pub total_value: f64,
    pub position_before: i64,
    pub position_after: i64,
    pub cash_before: f64,
    pub cash_after: f64,
    pub realized_pnl: f64,
    pub commission: f64,
}

/// Applies BUY/SELL decisions to a [`PortfolioState`] under the configured
/// cost model: commission on both sides, transaction tax only on the SELL
/// leg and only when the realized result (net of commission, before tax)
/// is a gain.
#[derive(Clone, Debug)]
pub struct TradeExecutor {
    commission_rate: f64,
    tax_rate: f64,
}

impl TradeExecutor {
    pub fn new(config: &BacktestConfig) -> Self {
        Self {
            commission_rate: config.commission_rate,
            tax_rate: config.tax_rate,
        }
    }

    /// Executes a trade, mutating `state` only when every precondition
    /// holds. On error the state is untouched.
    pub fn execute(
        &self,
        state: &mut PortfolioState,
        ticker: &Ticker,
        action: TradingAction,
        price: f64,
        quantity: i64,
        prediction_id: Option<i64>,
        trade_date: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        if !(price > 0.0) || !price.is_finite() {
            return Err(TradeError::InvalidInput(format!("price must be positive, got {price}")));
        }
        if quantity <= 0 {
            return Err(TradeError::InvalidInput(format!(
                "quantity must be positive, got {quantity}"
            )));
        }

        let position_before = state.held_quantity(ticker);
        let cash_before = state.cash;
        let trade_value = price * quantity as f64;
        let mut commission = trade_value * self.commission_rate;
        let mut realized_pnl = 0.0;

        match action {
            TradingAction::Buy => {
                let total_cost = trade_value + commission;
                if total_cost > state.cash {
                    return Err(TradeError::InsufficientCash {
                        required: total_cost,
                        available: state.cash,
                    });
                }
                state.cash -= total_cost;

                match state.positions.get_mut(ticker) {
                    Some(position) => {
                        let new_quantity = position.quantity + quantity;
                        let new_total_cost = position.total_cost + trade_value;
                        position.quantity = new_quantity;
                        position.total_cost = new_total_cost;
                        position.avg_price = new_total_cost / new_quantity as f64;
                        position.update_mark(price);
                    }
                    None => {
                        state
                            .positions
                            .insert(ticker.clone(), Position::open(ticker.clone(), quantity, price));
                    }
                }
            }
            TradingAction::Sell => {
                if position_before < quantity {
                    return Err(TradeError::InsufficientShares {
                        ticker: ticker.to_string(),
                        requested: quantity,
                        held: position_before,
                    });
                }
                let Some(position) = state.positions.get_mut(ticker) else {
                    return Err(TradeError::InsufficientShares {
                        ticker: ticker.to_string(),
                        requested: quantity,
                        held: 0,
                    });
                };
                let avg_price = position.avg_price;

                realized_pnl = (price - avg_price) * quantity as f64 - commission;
                // Transaction tax on gains only; a losing sell pays
                // commission but never tax.
                if realized_pnl > 0.0 {
                    let tax = trade_value * self.tax_rate;
                    realized_pnl -= tax;
                    commission += tax;
                }

                state.cash += trade_value - commission;

                position.quantity -= quantity;
                if position.quantity == 0 {
                    state.positions.remove(ticker);
                } else {
                    position.total_cost = position.avg_price * position.quantity as f64;
                    position.update_mark(price);
                }
            }
            TradingAction::Hold => {
                return Err(TradeError::InvalidInput("cannot execute a HOLD".to_string()));
            }
        }

        state.recompute_valuation();

        let trade = Trade {
            id: None,
            ref_id: format!("TRD_{}", nanoid::nanoid!(10)),
            prediction_id,
            ticker: ticker.clone(),
            action,
            trade_date,
            price,
            quantity,
            total_value: trade_value,
            position_before,
            position_after: state.held_quantity(ticker),
            cash_before,
            cash_after: state.cash,
            realized_pnl,
            commission,
        };

        debug!(
            ticker = %ticker,
            action = %action,
            quantity,
            price,
            realized_pnl,
            "trade_applied"
        );

        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn krx_config() -> BacktestConfig {
        BacktestConfig::default()
    }

    fn buy_100_at_50k(state: &mut PortfolioState, executor: &TradeExecutor) -> Trade {
        executor
            .execute(
                state,
                &Ticker::new("005930"),
                TradingAction::Buy,
                50_000.0,
                100,
                None,
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn test_buy_cost_model() {
        // 10,000,000 - 5,000,000 - 750 commission = 4,999,250
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);

        let trade = buy_100_at_50k(&mut state, &executor);

        assert!((state.cash - 4_999_250.0).abs() < 1e-6);
        assert!((trade.commission - 750.0).abs() < 1e-6);
        assert_eq!(trade.realized_pnl, 0.0);

        let position = state.position(&Ticker::new("005930")).unwrap();
        assert_eq!(position.quantity, 100);
        assert!((position.avg_price - 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sell_with_gain_pays_commission_and_tax() {
        // pretax pnl 500,000; commission 825; tax 12,650; realized 486,525
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        buy_100_at_50k(&mut state, &executor);

        let trade = executor
            .execute(
                &mut state,
                &Ticker::new("005930"),
                TradingAction::Sell,
                55_000.0,
                100,
                None,
                Utc::now(),
            )
            .unwrap();

        assert!((trade.realized_pnl - 486_525.0).abs() < 1e-6);
        assert!((trade.commission - (825.0 + 12_650.0)).abs() < 1e-6);
        assert!((state.cash - (4_999_250.0 + 5_486_525.0)).abs() < 1e-6);
    }

    #[test]
    fn test_losing_sell_pays_no_tax() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        buy_100_at_50k(&mut state, &executor);

        let trade = executor
            .execute(
                &mut state,
                &Ticker::new("005930"),
                TradingAction::Sell,
                45_000.0,
                100,
                None,
                Utc::now(),
            )
            .unwrap();

        let expected_commission = 45_000.0 * 100.0 * config.commission_rate;
        let expected_pnl = (45_000.0 - 50_000.0) * 100.0 - expected_commission;
        assert!((trade.commission - expected_commission).abs() < 1e-6);
        assert!((trade.realized_pnl - expected_pnl).abs() < 1e-6);
    }

    #[test]
    fn test_full_sell_removes_position() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        buy_100_at_50k(&mut state, &executor);

        executor
            .execute(
                &mut state,
                &Ticker::new("005930"),
                TradingAction::Sell,
                51_000.0,
                100,
                None,
                Utc::now(),
            )
            .unwrap();

        assert!(state.positions.is_empty());
    }

    #[test]
    fn test_partial_sell_keeps_cost_basis_consistent() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        buy_100_at_50k(&mut state, &executor);

        executor
            .execute(
                &mut state,
                &Ticker::new("005930"),
                TradingAction::Sell,
                51_000.0,
                40,
                None,
                Utc::now(),
            )
            .unwrap();

        let position = state.position(&Ticker::new("005930")).unwrap();
        assert_eq!(position.quantity, 60);
        assert!(
            (position.avg_price * position.quantity as f64 - position.total_cost).abs() < 1e-6
        );
    }

    #[test]
    fn test_buy_exceeding_cash_is_rejected_not_clamped() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(1_000_000.0);

        let result = executor.execute(
            &mut state,
            &Ticker::new("005930"),
            TradingAction::Buy,
            50_000.0,
            100,
            None,
            Utc::now(),
        );

        assert!(matches!(result, Err(TradeError::InsufficientCash { .. })));
        assert_eq!(state.cash, 1_000_000.0);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn test_oversell_is_rejected() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        buy_100_at_50k(&mut state, &executor);

        let result = executor.execute(
            &mut state,
            &Ticker::new("005930"),
            TradingAction::Sell,
            50_000.0,
            101,
            None,
            Utc::now(),
        );

        assert!(matches!(result, Err(TradeError::InsufficientShares { .. })));
        assert_eq!(state.held_quantity(&Ticker::new("005930")), 100);
    }

    #[test]
    fn test_weighted_average_price_on_repeat_buy() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(100_000_000.0);
        let ticker = Ticker::new("005930");

        executor
            .execute(&mut state, &ticker, TradingAction::Buy, 50_000.0, 100, None, Utc::now())
            .unwrap();
        executor
            .execute(&mut state, &ticker, TradingAction::Buy, 60_000.0, 50, None, Utc::now())
            .unwrap();

        let position = state.position(&ticker).unwrap();
        let expected_avg = (100.0 * 50_000.0 + 50.0 * 60_000.0) / 150.0;
        assert!((position.avg_price - expected_avg).abs() < 1e-6);
        assert_eq!(position.quantity, 150);
    }

    #[test]
    fn test_rejects_non_positive_inputs() {
        let config = krx_config();
        let executor = TradeExecutor::new(&config);
        let mut state = PortfolioState::new(10_000_000.0);
        let ticker = Ticker::new("005930");

        assert!(executor
            .execute(&mut state, &ticker, TradingAction::Buy, 0.0, 10, None, Utc::now())
            .is_err());
        assert!(executor
            .execute(&mut state, &ticker, TradingAction::Buy, 50_000.0, 0, None, Utc::now())
            .is_err());
    }
}
