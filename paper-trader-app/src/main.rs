//! Paper Trading Service
//!
//! Wires the backtesting core into a long-running service: SQLite-backed
//! portfolio engine, prediction outcome tracking, daily scheduler and the
//! REST API the dashboard consumes.

mod config;
mod history;
mod scheduler;

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use backtest_core::api::ApiServer;
use backtest_core::{BacktestStore, PaperTrader};

use crate::config::AppConfig;
use crate::history::SharedPriceHistory;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("🚀 Starting paper trading service");

    let app_config = AppConfig::load()?;
    app_config.backtest.validate()?;

    let store = BacktestStore::connect(&app_config.database.url).await?;
    info!(database = %app_config.database.url, "store_connected");

    let history = SharedPriceHistory::new();
    let trader = Arc::new(
        PaperTrader::new(
            app_config.backtest.clone(),
            store,
            Arc::new(history.clone()),
        )
        .await?,
    );

    let summary = trader.get_portfolio_summary();
    info!(
        cash = summary.cash,
        total_value = summary.total_value,
        positions = summary.positions.len(),
        "✅ Portfolio ready"
    );

    // API server task
    let api = ApiServer::new(trader.clone(), app_config.server.port);
    let api_task = tokio::spawn(async move {
        api.start().await;
    });

    // Daily routine scheduler task
    let schedule = Scheduler::new(trader.clone(), history, app_config.schedule.clone());
    let scheduler_task = tokio::spawn(async move {
        if let Err(e) = schedule.run().await {
            error!(error = %e, "scheduler_stopped");
        }
    });

    info!(port = app_config.server.port, "📊 Service is running. Press Ctrl+C to stop.");

    // Run until interrupted
    let shutdown = signal::ctrl_c();
    tokio::select! {
        _ = shutdown => {
            info!("🛑 Shutdown signal received");
        }
        _ = api_task => {
            error!("api_server_exited");
        }
        _ = scheduler_task => {
            error!("scheduler_exited");
        }
    }

    info!("✅ Paper trading service shutdown complete");
    Ok(())
}
