//! Signal policy: prediction → trading decision

use serde::{Deserialize, Serialize};

use crate::market::types::TradingAction;
use crate::paper_trading::config::BacktestConfig;
use crate::paper_trading::portfolio::{PortfolioState, Position};

/// Why a decision fired. Exit reasons are kept distinct even when the
/// action is the same, because downstream logging and reports attribute
/// sells to the rule that produced them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ConfidenceGate,
    EntrySignal,
    ExitSignal,
    StopLoss,
    TakeProfit,
    NoSignal,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalDecision {
    pub action: TradingAction,
    pub reason: DecisionReason,
}

impl SignalDecision {
    fn hold(reason: DecisionReason) -> Self {
        Self {
            action: TradingAction::Hold,
            reason,
        }
    }

    fn sell(reason: DecisionReason) -> Self {
        Self {
            action: TradingAction::Sell,
            reason,
        }
    }
}

/// Pure decision rules over (prediction, current position, config).
///
/// Rule order is fixed priority: confidence gate, entry, momentum exit,
/// then stop-loss/take-profit. A strong sell signal and a breached
/// take-profit both produce SELL, but through different rules.
pub struct SignalPolicy;

impl SignalPolicy {
    pub fn decide(
        probability: f64,
        confidence: f64,
        position: Option<&Position>,
        config: &BacktestConfig,
    ) -> SignalDecision {
        let held = position.map_or(0, |p| p.quantity);

        // Noise filter: low-confidence predictions never trade.
        if confidence < config.confidence_threshold {
            return SignalDecision::hold(DecisionReason::ConfidenceGate);
        }

        if probability > config.probability_buy_threshold && held == 0 {
            return SignalDecision {
                action: TradingAction::Buy,
                reason: DecisionReason::EntrySignal,
            };
        }

        if probability < config.probability_sell_threshold && held > 0 {
            return SignalDecision::sell(DecisionReason::ExitSignal);
        }

        if let Some(position) = position.filter(|p| p.quantity > 0) {
            let pnl_pct = position.pnl_pct();
            if pnl_pct < -config.stop_loss {
                return SignalDecision::sell(DecisionReason::StopLoss);
            }
            if pnl_pct > config.take_profit {
                return SignalDecision::sell(DecisionReason::TakeProfit);
            }
        }

        SignalDecision::hold(DecisionReason::NoSignal)
    }

    /// Sizes a decided trade in whole shares.
    ///
    /// BUY spends at most `total_value × max_position_size`, capped at 95%
    /// of cash, and refuses trades below `min_trade_value`. SELL always
    /// liquidates the full held quantity.
    pub fn size(
        action: TradingAction,
        ticker_held: i64,
        price: f64,
        portfolio: &PortfolioState,
        config: &BacktestConfig,
    ) -> i64 {
        match action {
            TradingAction::Buy => {
                let max_position_value = portfolio.total_value * config.max_position_size;
                let available_cash = portfolio.cash * 0.95;
                let max_value = max_position_value.min(available_cash);

                if max_value < config.min_trade_value {
                    return 0;
                }
                (max_value / price).floor() as i64
            }
            TradingAction::Sell => ticker_held,
            TradingAction::Hold => 0,
        }
    }
}
