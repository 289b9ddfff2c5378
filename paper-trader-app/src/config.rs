//! Application configuration
//!
//! Merges defaults, an optional TOML file and `BACKTEST_`-prefixed
//! environment overrides.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use backtest_core::BacktestConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Local times ("HH:MM") for the daily routines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub morning_routine_time: String,
    pub afternoon_check_time: String,
    pub daily_report_time: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub backtest: BacktestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 8090 },
            database: DatabaseConfig {
                url: "sqlite://backtesting.db".to_string(),
            },
            schedule: ScheduleConfig {
                morning_routine_time: "09:00".to_string(),
                afternoon_check_time: "16:00".to_string(),
                daily_report_time: "22:00".to_string(),
            },
            backtest: BacktestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration, layering `config/Backtest.toml` and
    /// environment variables over the defaults.
    pub fn load() -> Result<Self> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("config/Backtest.toml"))
            .merge(Env::prefixed("BACKTEST_").split("__"))
            .extract()
            .context("failed to load configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.backtest.validate().unwrap();
        assert_eq!(config.server.port, 8090);
    }
}
