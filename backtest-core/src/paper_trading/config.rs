//! Backtest configuration

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// Rebalancing cadence
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    Monthly,
}

/// Thresholds driving rule-based report insights.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub accuracy_low: f64,
    pub accuracy_high: f64,
    pub win_rate_low: f64,
    pub profit_factor_good: f64,
    pub sharpe_low: f64,
    pub drawdown_warning: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            accuracy_low: 0.5,
            accuracy_high: 0.6,
            win_rate_low: 0.4,
            profit_factor_good: 1.5,
            sharpe_low: 0.5,
            drawdown_warning: 0.20,
        }
    }
}

/// Immutable configuration bundle for one engine instance.
///
/// Defaults encode KRX conventions (0.015% commission, 0.23% securities
/// transaction tax on gains) but every rate is a plain parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub tax_rate: f64,
    pub slippage: f64,

    // Position management
    pub max_positions: usize,
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub min_trade_value: f64,

    // Risk management
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_stop: f64,
    pub max_drawdown_limit: f64,

    // Signal thresholds
    pub confidence_threshold: f64,
    pub probability_buy_threshold: f64,
    pub probability_sell_threshold: f64,

    // Rebalancing
    pub rebalance_frequency: RebalanceFrequency,

    // Outcome verification
    pub data_retention_days: i64,

    // Performance measurement
    pub risk_free_rate: f64,
    pub benchmark_ticker: String,

    // Per-tick budget for external price lookups, in milliseconds.
    pub price_lookup_timeout_ms: u64,

    pub alert_thresholds: AlertThresholds,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000_000.0,
            commission_rate: 0.00015,
            tax_rate: 0.0023,
            slippage: 0.001,
            max_positions: 10,
            max_position_size: 0.2,
            min_position_size: 0.02,
            min_trade_value: 100_000.0,
            stop_loss: 0.05,
            take_profit: 0.10,
            trailing_stop: 0.03,
            max_drawdown_limit: 0.25,
            confidence_threshold: 0.6,
            probability_buy_threshold: 0.65,
            probability_sell_threshold: 0.35,
            rebalance_frequency: RebalanceFrequency::Weekly,
            data_retention_days: 90,
            risk_free_rate: 0.03,
            benchmark_ticker: "^KS11".to_string(),
            price_lookup_timeout_ms: 5_000,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

impl BacktestConfig {
    /// Fails fast on a config that could corrupt portfolio math.
    /// Must run before any trading begins.
    pub fn validate(&self) -> CoreResult<()> {
        fn require(cond: bool, msg: &str) -> CoreResult<()> {
            if cond {
                Ok(())
            } else {
                Err(CoreError::Config(msg.to_string()))
            }
        }

        require(self.initial_capital > 0.0, "initial_capital must be positive")?;
        require(
            (0.0..1.0).contains(&self.commission_rate),
            "commission_rate must be in [0, 1)",
        )?;
        require((0.0..1.0).contains(&self.tax_rate), "tax_rate must be in [0, 1)")?;
        require((0.0..1.0).contains(&self.slippage), "slippage must be in [0, 1)")?;
        require(
            self.max_position_size > 0.0 && self.max_position_size <= 1.0,
            "max_position_size must be in (0, 1]",
        )?;
        require(
            self.min_position_size >= 0.0 && self.min_position_size <= self.max_position_size,
            "min_position_size must be in [0, max_position_size]",
        )?;
        require(self.min_trade_value >= 0.0, "min_trade_value must be non-negative")?;
        require(self.max_positions > 0, "max_positions must be positive")?;
        require(self.stop_loss > 0.0, "stop_loss must be positive")?;
        require(self.take_profit > 0.0, "take_profit must be positive")?;
        require(
            (0.0..=1.0).contains(&self.confidence_threshold),
            "confidence_threshold must be in [0, 1]",
        )?;
        require(
            (0.0..=1.0).contains(&self.probability_buy_threshold)
                && (0.0..=1.0).contains(&self.probability_sell_threshold),
            "probability thresholds must be in [0, 1]",
        )?;
        require(
            self.probability_sell_threshold < self.probability_buy_threshold,
            "probability_sell_threshold must be below probability_buy_threshold",
        )?;
        require(self.data_retention_days > 0, "data_retention_days must be positive")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        BacktestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_crossed_probability_thresholds() {
        let config = BacktestConfig {
            probability_buy_threshold: 0.3,
            probability_sell_threshold: 0.7,
            ..BacktestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_capital() {
        let config = BacktestConfig {
            initial_capital: 0.0,
            ..BacktestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
