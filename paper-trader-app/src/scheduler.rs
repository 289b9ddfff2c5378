//! Daily backtesting routines
//!
//! Mirrors the operational cadence of the trading day: a morning pass
//! (resolve yesterday's predictions, rebalance), an afternoon pass
//! (record closes, revalue, risk check) and an evening pass (late
//! horizons, daily metrics, weekly cleanup).

use chrono::{Datelike, Local, NaiveDate, NaiveTime, Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};

use backtest_core::analytics::MetricsPeriod;
use backtest_core::paper_trading::RebalanceFrequency;
use backtest_core::PaperTrader;

use crate::config::ScheduleConfig;
use crate::history::SharedPriceHistory;

/// How often the scheduler looks at the clock.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

struct Routine {
    at: NaiveTime,
    last_run: Option<NaiveDate>,
}

impl Routine {
    fn new(at: NaiveTime) -> Self {
        Self { at, last_run: None }
    }

    fn due(&self, today: NaiveDate, now: NaiveTime) -> bool {
        now >= self.at && self.last_run != Some(today)
    }
}

pub struct Scheduler {
    trader: Arc<PaperTrader>,
    history: SharedPriceHistory,
    schedule: ScheduleConfig,
}

impl Scheduler {
    pub fn new(
        trader: Arc<PaperTrader>,
        history: SharedPriceHistory,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            trader,
            history,
            schedule,
        }
    }

    /// Runs until the task is aborted.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut morning = Routine::new(parse_time(&self.schedule.morning_routine_time)?);
        let mut afternoon = Routine::new(parse_time(&self.schedule.afternoon_check_time)?);
        let mut evening = Routine::new(parse_time(&self.schedule.daily_report_time)?);

        info!("scheduler_started");
        let mut ticker = interval(POLL_INTERVAL);

        loop {
            ticker.tick().await;
            let now = Local::now();
            let today = now.date_naive();
            let time = now.time();

            if morning.due(today, time) {
                morning.last_run = Some(today);
                if let Err(e) = self.morning_routine().await {
                    error!(error = %e, "morning_routine_error");
                }
            }
            if afternoon.due(today, time) {
                afternoon.last_run = Some(today);
                if let Err(e) = self.afternoon_check().await {
                    error!(error = %e, "afternoon_check_error");
                }
            }
            if evening.due(today, time) {
                evening.last_run = Some(today);
                if let Err(e) = self.daily_report(today).await {
                    error!(error = %e, "daily_report_error");
                }
            }
        }
    }

    /// 09:00 — resolve yesterday's predictions, then rebalance.
    async fn morning_routine(&self) -> anyhow::Result<()> {
        info!("morning_routine_started");

        let checked = self.trader.check_predictions(1).await?;
        info!(checked, "overnight_predictions_checked");

        self.rebalance_portfolio().await?;

        info!("morning_routine_completed");
        Ok(())
    }

    /// 16:00 — record the day's closes, revalue the portfolio, check
    /// risk limits.
    async fn afternoon_check(&self) -> anyhow::Result<()> {
        info!("afternoon_check_started");

        let prices = self.trader.current_prices();
        let today = Utc::now().date_naive();
        for (ticker, price) in &prices {
            self.history.record(ticker.clone(), today, *price);
        }

        if prices.is_empty() {
            warn!("no_prices_observed_today");
        } else {
            // A hung revaluation means a missed tick, not a stalled
            // portfolio: log, skip, resume on the next cycle.
            let budget =
                Duration::from_millis(self.trader.config().price_lookup_timeout_ms);
            match timeout(budget, self.trader.update_portfolio_values(&prices)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("portfolio_revaluation_timed_out_tick_skipped");
                    return Ok(());
                }
            }
        }

        let summary = self.trader.get_portfolio_summary();
        let limit = self.trader.config().max_drawdown_limit;
        if summary.max_drawdown.abs() > limit {
            warn!(
                drawdown = summary.max_drawdown,
                limit, "max_drawdown_limit_breached"
            );
        }

        info!(total_value = summary.total_value, "afternoon_check_completed");
        Ok(())
    }

    /// 22:00 — late horizons, daily metrics, weekly report and retention.
    async fn daily_report(&self, today: NaiveDate) -> anyhow::Result<()> {
        info!("daily_report_started");

        self.trader.check_predictions(3).await?;
        self.trader.check_predictions(7).await?;

        let metrics = self
            .trader
            .calculate_performance_metrics(MetricsPeriod::Daily)
            .await?;
        self.notify(&metrics);

        if today.weekday() == Weekday::Mon {
            let end = Utc::now();
            let start = end - chrono::Duration::days(7);
            let report = self.trader.generate_report(start, end).await?;
            for insight in &report.insights {
                info!(
                    kind = %insight.kind,
                    category = %insight.category,
                    message = %insight.message,
                    "weekly_insight"
                );
            }

            let (purged, expired) = self.trader.cleanup_old_predictions().await?;
            info!(purged, expired, "weekly_cleanup_completed");
        }

        info!(
            accuracy = metrics.accuracy_rate,
            predictions = metrics.total_predictions,
            "daily_report_completed"
        );
        Ok(())
    }

    /// Closes positions that breached the stop-loss/take-profit bands,
    /// honoring the configured rebalance cadence.
    async fn rebalance_portfolio(&self) -> anyhow::Result<()> {
        let config = self.trader.config();
        let today = Local::now().date_naive();
        match config.rebalance_frequency {
            RebalanceFrequency::Daily => {}
            RebalanceFrequency::Weekly if today.weekday() != Weekday::Mon => return Ok(()),
            RebalanceFrequency::Monthly if today.day() != 1 => return Ok(()),
            _ => {}
        }

        let stop_loss_pct = -config.stop_loss * 100.0;
        let take_profit_pct = config.take_profit * 100.0;

        for position in self.trader.get_portfolio_summary().positions {
            let ticker = position.ticker.clone();
            if position.pnl_pct < stop_loss_pct {
                self.trader.close_position(&ticker, "stop_loss").await?;
                info!(ticker = %ticker, pnl_pct = position.pnl_pct, "position_closed_stop_loss");
            } else if position.pnl_pct > take_profit_pct {
                self.trader.close_position(&ticker, "take_profit").await?;
                info!(ticker = %ticker, pnl_pct = position.pnl_pct, "position_closed_take_profit");
            }
        }
        Ok(())
    }

    fn notify(&self, metrics: &backtest_core::PerformanceMetrics) {
        let thresholds = &self.trader.config().alert_thresholds;

        if metrics.total_predictions == 0 {
            info!("no_predictions_resolved_today");
            return;
        }
        if metrics.accuracy_rate < thresholds.accuracy_low {
            warn!(accuracy = metrics.accuracy_rate, "daily_accuracy_below_threshold");
        } else if metrics.accuracy_rate > thresholds.accuracy_high {
            info!(accuracy = metrics.accuracy_rate, "daily_accuracy_healthy");
        }
        if metrics.max_drawdown.abs() > thresholds.drawdown_warning * 100.0 {
            warn!(drawdown = metrics.max_drawdown, "drawdown_warning");
        }
    }
}

fn parse_time(value: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid schedule time {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time("09:00").unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("morning").is_err());
    }

    #[test]
    fn test_routine_fires_once_per_day() {
        let mut routine = Routine::new(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        assert!(!routine.due(today, NaiveTime::from_hms_opt(8, 59, 0).unwrap()));
        assert!(routine.due(today, NaiveTime::from_hms_opt(9, 0, 30).unwrap()));

        routine.last_run = Some(today);
        assert!(!routine.due(today, NaiveTime::from_hms_opt(10, 0, 0).unwrap()));

        let tomorrow = today.succ_opt().unwrap();
        assert!(routine.due(tomorrow, NaiveTime::from_hms_opt(9, 5, 0).unwrap()));
    }
}
