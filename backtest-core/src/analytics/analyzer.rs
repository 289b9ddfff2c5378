//! Performance report generation
//!
//! Loads predictions, trades and snapshots over a period through fixed
//! queries, then aggregates in memory. Confidence buckets, horizons and
//! sectors are enumerated here, never interpolated into SQL.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::analytics::risk::{self, DrawdownAnalysis, RiskReport};
use crate::errors::CoreResult;
use crate::market::types::TradingAction;
use crate::paper_trading::config::{AlertThresholds, BacktestConfig};
use crate::paper_trading::executor::Trade;
use crate::paper_trading::portfolio::PortfolioSnapshot;
use crate::store::BacktestStore;
use crate::tracking::ledger::{
    Horizon, PredictedDirection, Prediction, PredictionLedger, PredictionStatus,
};

/// Discrete confidence tiers; thresholds are part of the report contract.
const CONFIDENCE_BUCKETS: [(&str, f64); 4] = [
    ("very_high", 0.8),
    ("high", 0.7),
    ("medium", 0.6),
    ("low", 0.5),
];

fn bucket_label(confidence: f64) -> &'static str {
    for (label, threshold) in CONFIDENCE_BUCKETS {
        if confidence >= threshold {
            return label;
        }
    }
    "very_low"
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_predictions: usize,
    pub correct_predictions: usize,
    pub accuracy_rate: f64,
    pub avg_confidence: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub level: String,
    pub predictions: usize,
    pub accuracy: f64,
    pub avg_actual_return_1d: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HourlyAccuracy {
    pub hour: u32,
    pub predictions: usize,
    pub accuracy: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HorizonAccuracy {
    pub one_day: f64,
    pub three_days: f64,
    pub seven_days: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PredictionAnalysis {
    pub summary: PredictionSummary,
    pub confidence_buckets: Vec<ConfidenceBucket>,
    pub hourly_accuracy: Vec<HourlyAccuracy>,
    pub horizon_accuracy: HorizonAccuracy,
    pub best_prediction_hour: Option<u32>,
    pub optimal_confidence_threshold: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TradingAnalysis {
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub total_realized_pnl: f64,
    pub total_commission: f64,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub period_return_pct: f64,
    pub annualized_return_pct: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectorPredictionStats {
    pub sector: String,
    pub predictions: usize,
    pub accuracy: f64,
    pub avg_confidence: f64,
    pub avg_return_1d: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectorTradeStats {
    pub sector: String,
    pub trades: usize,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub winning_trades: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SectorAnalysis {
    pub sector_predictions: Vec<SectorPredictionStats>,
    pub sector_trades: Vec<SectorTradeStats>,
    pub best_performing_sector: Option<String>,
    pub most_accurate_sector: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub month: String,
    pub return_pct: f64,
    pub end_value: f64,
}

/// Structured, rule-generated observation. The category taxonomy
/// (prediction/timing/confidence/trading/risk/sector) is fixed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub message: String,
    pub action: Option<String>,
}

/// Risk section with an explicit no-data marker: "nothing to measure yet"
/// and "computation failed" must stay distinguishable from real zeros.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RiskSection {
    pub no_data: bool,
    pub error: Option<String>,
    pub metrics: RiskReport,
    pub drawdown_analysis: DrawdownAnalysis,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub period: ReportPeriod,
    pub prediction_performance: PredictionAnalysis,
    pub trading_performance: TradingAnalysis,
    pub risk_metrics: RiskSection,
    pub sector_analysis: SectorAnalysis,
    pub monthly_returns: Vec<MonthlyReturn>,
    pub insights: Vec<Insight>,
    pub generated_at: DateTime<Utc>,
}

/// Reporting window for `calculate_performance_metrics`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricsPeriod {
    Daily,
    Weekly,
    Monthly,
    All,
}

impl MetricsPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "all" | "all-time" => Some(Self::All),
            _ => None,
        }
    }

    fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => now - Duration::days(1),
            Self::Weekly => now - Duration::days(7),
            Self::Monthly => now - Duration::days(30),
            Self::All => DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// Condensed period metrics for schedulers and dashboards.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub period: String,
    pub total_predictions: usize,
    pub correct_predictions: usize,
    pub accuracy_rate: f64,
    pub bullish_predictions: usize,
    pub bullish_correct: usize,
    pub bullish_accuracy: f64,
    pub bearish_predictions: usize,
    pub bearish_correct: usize,
    pub bearish_accuracy: f64,
    pub paper_trading_return_pct: f64,
    pub win_rate: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub period1_value: f64,
    pub period2_value: f64,
    pub change: f64,
    pub change_pct: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub period1: ReportPeriod,
    pub period2: ReportPeriod,
    pub improvements: Vec<MetricDelta>,
    pub deteriorations: Vec<MetricDelta>,
}

pub struct PerformanceAnalyzer {
    store: BacktestStore,
    ledger: PredictionLedger,
    risk_free_rate: f64,
    thresholds: AlertThresholds,
}

impl PerformanceAnalyzer {
    pub fn new(store: BacktestStore, config: &BacktestConfig) -> Self {
        let ledger = PredictionLedger::new(&store);
        Self {
            store,
            ledger,
            risk_free_rate: config.risk_free_rate,
            thresholds: config.alert_thresholds.clone(),
        }
    }

    pub async fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Report> {
        info!(%start, %end, "generating_performance_report");

        let predictions = self.ledger.between(start, end).await?;
        let trades = self.store.trades_between(start, end).await?;
        let snapshots = self.store.snapshots_between(start, end).await?;
        let sectors = self.store.sectors().await?;

        let prediction_performance = analyze_predictions(&predictions);
        let trading_performance = analyze_trading(&trades, &snapshots, start, end);
        let returns: Vec<f64> = snapshots.iter().map(|s| s.daily_return).collect();
        let risk_metrics = RiskSection {
            no_data: returns.len() < 2,
            error: None,
            metrics: RiskReport::from_returns(&returns, self.risk_free_rate),
            drawdown_analysis: risk::analyze_drawdowns(&returns),
        };
        let sector_analysis = analyze_sectors(&predictions, &trades, &sectors);
        let monthly_returns = monthly_returns(&snapshots);
        let insights = generate_insights(
            &prediction_performance,
            &trading_performance,
            &risk_metrics,
            &sector_analysis,
            &self.thresholds,
        );

        Ok(Report {
            period: ReportPeriod {
                start,
                end,
                days: (end - start).num_days(),
            },
            prediction_performance,
            trading_performance,
            risk_metrics,
            sector_analysis,
            monthly_returns,
            insights,
            generated_at: Utc::now(),
        })
    }

    pub async fn calculate_performance_metrics(
        &self,
        period: MetricsPeriod,
    ) -> CoreResult<PerformanceMetrics> {
        let now = Utc::now();
        let start = period.start_from(now);

        let predictions = self.ledger.between(start, now).await?;
        let snapshots = self.store.snapshots_between(start, now).await?;
        let trades = self.store.trades_between(start, now).await?;

        let finalized: Vec<&Prediction> =
            predictions.iter().filter(|p| p.status.is_finalized()).collect();
        let correct = finalized
            .iter()
            .filter(|p| p.status == PredictionStatus::Correct)
            .count();

        let bullish: Vec<&&Prediction> = finalized
            .iter()
            .filter(|p| p.predicted_direction == PredictedDirection::Up)
            .collect();
        let bullish_correct = bullish
            .iter()
            .filter(|p| p.status == PredictionStatus::Correct)
            .count();
        let bearish_total = finalized.len() - bullish.len();
        let bearish_correct = correct - bullish_correct;

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        let returns: Vec<f64> = snapshots.iter().map(|s| s.daily_return).collect();
        let sells: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.action == TradingAction::Sell)
            .collect();
        let wins = sells.iter().filter(|t| t.realized_pnl > 0.0).count();

        let period_return_pct = match (snapshots.first(), snapshots.last()) {
            (Some(first), Some(last)) if first.total_value > 0.0 => {
                (last.total_value - first.total_value) / first.total_value * 100.0
            }
            _ => 0.0,
        };

        let period_name = match period {
            MetricsPeriod::Daily => "daily",
            MetricsPeriod::Weekly => "weekly",
            MetricsPeriod::Monthly => "monthly",
            MetricsPeriod::All => "all",
        };

        Ok(PerformanceMetrics {
            period: period_name.to_string(),
            total_predictions: finalized.len(),
            correct_predictions: correct,
            accuracy_rate: ratio(correct, finalized.len()),
            bullish_predictions: bullish.len(),
            bullish_correct,
            bullish_accuracy: ratio(bullish_correct, bullish.len()),
            bearish_predictions: bearish_total,
            bearish_correct,
            bearish_accuracy: ratio(bearish_correct, bearish_total),
            paper_trading_return_pct: round2(period_return_pct),
            win_rate: ratio(wins, sells.len()),
            volatility: round2(risk::volatility(&returns) * 100.0),
            max_drawdown: round2(risk::max_drawdown(&returns) * 100.0),
            sharpe_ratio: round2(risk::sharpe_ratio(&returns, self.risk_free_rate)),
            sortino_ratio: round2(risk::sortino_ratio(&returns, self.risk_free_rate)),
        })
    }

    /// Report diff across two periods: metric shifts beyond 10% either way.
    pub async fn compare_periods(
        &self,
        period1: (DateTime<Utc>, DateTime<Utc>),
        period2: (DateTime<Utc>, DateTime<Utc>),
    ) -> CoreResult<ComparisonReport> {
        let report1 = self.generate_report(period1.0, period1.1).await?;
        let report2 = self.generate_report(period2.0, period2.1).await?;

        let metrics1 = key_metrics(&report1);
        let metrics2 = key_metrics(&report2);

        let mut improvements = Vec::new();
        let mut deteriorations = Vec::new();

        for (name, value1) in &metrics1 {
            let Some(value2) = metrics2.get(name) else { continue };
            let change = value2 - value1;
            let change_pct = if *value1 != 0.0 {
                change / value1.abs() * 100.0
            } else {
                0.0
            };
            if change_pct.abs() <= 10.0 {
                continue;
            }
            let delta = MetricDelta {
                metric: name.clone(),
                period1_value: *value1,
                period2_value: *value2,
                change,
                change_pct,
            };
            if change_pct > 0.0 {
                improvements.push(delta);
            } else {
                deteriorations.push(delta);
            }
        }

        Ok(ComparisonReport {
            period1: report1.period,
            period2: report2.period,
            improvements,
            deteriorations,
        })
    }
}

fn key_metrics(report: &Report) -> HashMap<String, f64> {
    HashMap::from([
        (
            "prediction_accuracy".to_string(),
            report.prediction_performance.summary.accuracy_rate,
        ),
        ("win_rate".to_string(), report.trading_performance.win_rate),
        (
            "period_return_pct".to_string(),
            report.trading_performance.period_return_pct,
        ),
        ("sharpe_ratio".to_string(), report.risk_metrics.metrics.sharpe_ratio),
        ("max_drawdown".to_string(), report.risk_metrics.metrics.max_drawdown),
        (
            "avg_confidence".to_string(),
            report.prediction_performance.summary.avg_confidence,
        ),
    ])
}

fn analyze_predictions(predictions: &[Prediction]) -> PredictionAnalysis {
    let finalized: Vec<&Prediction> =
        predictions.iter().filter(|p| p.status.is_finalized()).collect();

    let correct = finalized
        .iter()
        .filter(|p| p.status == PredictionStatus::Correct)
        .count();

    let summary = PredictionSummary {
        total_predictions: finalized.len(),
        correct_predictions: correct,
        accuracy_rate: if finalized.is_empty() {
            0.0
        } else {
            correct as f64 / finalized.len() as f64
        },
        avg_confidence: if finalized.is_empty() {
            0.0
        } else {
            finalized.iter().map(|p| p.confidence).sum::<f64>() / finalized.len() as f64
        },
    };

    // Confidence buckets
    let mut buckets: HashMap<&str, (usize, usize, f64)> = HashMap::new();
    for p in &finalized {
        let entry = buckets.entry(bucket_label(p.confidence)).or_default();
        entry.0 += 1;
        if p.status == PredictionStatus::Correct {
            entry.1 += 1;
        }
        entry.2 += p.actual_return_1d.unwrap_or(0.0);
    }
    let mut confidence_buckets: Vec<ConfidenceBucket> = buckets
        .into_iter()
        .map(|(level, (n, wins, return_sum))| ConfidenceBucket {
            level: level.to_string(),
            predictions: n,
            accuracy: wins as f64 / n as f64,
            avg_actual_return_1d: return_sum / n as f64,
        })
        .collect();
    confidence_buckets.sort_by(|a, b| {
        b.accuracy
            .partial_cmp(&a.accuracy)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Hour-of-day accuracy
    let mut hours: HashMap<u32, (usize, usize)> = HashMap::new();
    for p in &finalized {
        let entry = hours.entry(p.prediction_date.hour()).or_default();
        entry.0 += 1;
        if p.status == PredictionStatus::Correct {
            entry.1 += 1;
        }
    }
    let mut hourly_accuracy: Vec<HourlyAccuracy> = hours
        .into_iter()
        .map(|(hour, (n, wins))| HourlyAccuracy {
            hour,
            predictions: n,
            accuracy: wins as f64 / n as f64,
        })
        .collect();
    hourly_accuracy.sort_by(|a, b| {
        b.accuracy
            .partial_cmp(&a.accuracy)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.hour.cmp(&b.hour))
    });

    // Horizon accuracy over predictions with the full 7-day outcome
    let complete: Vec<&&Prediction> = finalized
        .iter()
        .filter(|p| p.actual_return_7d.is_some())
        .collect();
    let direction_match = |p: &Prediction, horizon: Horizon| -> bool {
        let Some(actual) = p.actual_return(horizon) else { return false };
        match p.predicted_direction {
            PredictedDirection::Up => actual > 0.0,
            PredictedDirection::Down => actual < 0.0,
        }
    };
    let horizon_rate = |horizon: Horizon| -> f64 {
        if complete.is_empty() {
            return 0.0;
        }
        complete.iter().filter(|p| direction_match(p, horizon)).count() as f64
            / complete.len() as f64
    };
    let horizon_accuracy = HorizonAccuracy {
        one_day: horizon_rate(Horizon::OneDay),
        three_days: horizon_rate(Horizon::ThreeDay),
        seven_days: horizon_rate(Horizon::SevenDay),
    };

    let best_prediction_hour = hourly_accuracy.first().map(|h| h.hour);
    let optimal_confidence_threshold = find_optimal_confidence(&confidence_buckets);

    PredictionAnalysis {
        summary,
        confidence_buckets,
        hourly_accuracy,
        horizon_accuracy,
        best_prediction_hour,
        optimal_confidence_threshold,
    }
}

/// Picks the confidence bucket maximizing `accuracy * ln(1 + samples)`.
/// The log damping keeps a high-accuracy bucket with a handful of samples
/// from outranking a solid, well-populated one.
fn find_optimal_confidence(buckets: &[ConfidenceBucket]) -> f64 {
    let mut best_score = 0.0;
    let mut optimal = 0.6;

    for bucket in buckets {
        let Some((_, threshold)) = CONFIDENCE_BUCKETS
            .iter()
            .find(|(label, _)| *label == bucket.level)
        else {
            continue;
        };
        let score = bucket.accuracy * (1.0 + bucket.predictions as f64).ln();
        if score > best_score {
            best_score = score;
            optimal = *threshold;
        }
    }
    optimal
}

fn analyze_trading(
    trades: &[Trade],
    snapshots: &[PortfolioSnapshot],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TradingAnalysis {
    let sells: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.action == TradingAction::Sell)
        .collect();
    let buys = trades.len() - sells.len();

    let wins: Vec<f64> = sells
        .iter()
        .filter(|t| t.realized_pnl > 0.0)
        .map(|t| t.realized_pnl)
        .collect();
    let losses: Vec<f64> = sells
        .iter()
        .filter(|t| t.realized_pnl < 0.0)
        .map(|t| t.realized_pnl)
        .collect();

    let gross_wins: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().sum::<f64>().abs();
    let profit_factor = if gross_losses > 0.0 {
        gross_wins / gross_losses
    } else {
        0.0
    };

    let period_return_pct = match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) if first.total_value > 0.0 => {
            (last.total_value - first.total_value) / first.total_value * 100.0
        }
        _ => 0.0,
    };
    let days = (end - start).num_days();
    let annualized_return_pct = if days > 0 {
        period_return_pct * 365.0 / days as f64
    } else {
        0.0
    };

    TradingAnalysis {
        total_trades: trades.len(),
        buy_trades: buys,
        sell_trades: sells.len(),
        total_realized_pnl: trades.iter().map(|t| t.realized_pnl).sum(),
        total_commission: trades.iter().map(|t| t.commission).sum(),
        winning_trades: wins.len(),
        win_rate: if sells.is_empty() {
            0.0
        } else {
            wins.len() as f64 / sells.len() as f64
        },
        avg_win: if wins.is_empty() {
            0.0
        } else {
            gross_wins / wins.len() as f64
        },
        avg_loss: if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        },
        profit_factor,
        period_return_pct,
        annualized_return_pct,
    }
}

fn analyze_sectors(
    predictions: &[Prediction],
    trades: &[Trade],
    sectors: &HashMap<String, String>,
) -> SectorAnalysis {
    let sector_of = |ticker: &str| -> String {
        sectors.get(ticker).cloned().unwrap_or_else(|| "Unknown".to_string())
    };

    let mut prediction_groups: HashMap<String, (usize, usize, f64, f64)> = HashMap::new();
    for p in predictions.iter().filter(|p| p.status.is_finalized()) {
        let entry = prediction_groups.entry(sector_of(p.ticker.as_str())).or_default();
        entry.0 += 1;
        if p.status == PredictionStatus::Correct {
            entry.1 += 1;
        }
        entry.2 += p.confidence;
        entry.3 += p.actual_return_1d.unwrap_or(0.0);
    }
    let mut sector_predictions: Vec<SectorPredictionStats> = prediction_groups
        .into_iter()
        .map(|(sector, (n, wins, conf_sum, return_sum))| SectorPredictionStats {
            sector,
            predictions: n,
            accuracy: wins as f64 / n as f64,
            avg_confidence: conf_sum / n as f64,
            avg_return_1d: return_sum / n as f64,
        })
        .collect();
    sector_predictions.sort_by(|a, b| {
        b.accuracy
            .partial_cmp(&a.accuracy)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut trade_groups: HashMap<String, (usize, f64, usize)> = HashMap::new();
    for t in trades.iter().filter(|t| t.action == TradingAction::Sell) {
        let entry = trade_groups.entry(sector_of(t.ticker.as_str())).or_default();
        entry.0 += 1;
        entry.1 += t.realized_pnl;
        if t.realized_pnl > 0.0 {
            entry.2 += 1;
        }
    }
    let mut sector_trades: Vec<SectorTradeStats> = trade_groups
        .into_iter()
        .map(|(sector, (n, pnl, wins))| SectorTradeStats {
            sector,
            trades: n,
            total_pnl: pnl,
            avg_pnl: pnl / n as f64,
            winning_trades: wins,
        })
        .collect();
    sector_trades.sort_by(|a, b| {
        b.total_pnl
            .partial_cmp(&a.total_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    SectorAnalysis {
        best_performing_sector: sector_trades.first().map(|s| s.sector.clone()),
        most_accurate_sector: sector_predictions.first().map(|s| s.sector.clone()),
        sector_predictions,
        sector_trades,
    }
}

fn monthly_returns(snapshots: &[PortfolioSnapshot]) -> Vec<MonthlyReturn> {
    let mut months: Vec<(String, f64, f64)> = Vec::new();
    for snapshot in snapshots {
        let key = snapshot.date.format("%Y-%m").to_string();
        match months.last_mut() {
            Some((month, _, end_value)) if *month == key => *end_value = snapshot.total_value,
            _ => months.push((key, snapshot.total_value, snapshot.total_value)),
        }
    }

    months
        .into_iter()
        .filter(|(_, start_value, _)| *start_value > 0.0)
        .map(|(month, start_value, end_value)| MonthlyReturn {
            month,
            return_pct: round2((end_value - start_value) / start_value * 100.0),
            end_value,
        })
        .collect()
}

fn generate_insights(
    predictions: &PredictionAnalysis,
    trading: &TradingAnalysis,
    risk_section: &RiskSection,
    sectors: &SectorAnalysis,
    thresholds: &AlertThresholds,
) -> Vec<Insight> {
    let mut insights = Vec::new();
    let push = |insights: &mut Vec<Insight>, kind: &str, category: &str, message: String, action: Option<&str>| {
        insights.push(Insight {
            kind: kind.to_string(),
            category: category.to_string(),
            message,
            action: action.map(str::to_string),
        });
    };

    let accuracy = predictions.summary.accuracy_rate;
    if predictions.summary.total_predictions > 0 {
        if accuracy < thresholds.accuracy_low {
            push(
                &mut insights,
                "warning",
                "prediction",
                format!("Prediction accuracy is low at {:.1}%. Consider retraining the model.", accuracy * 100.0),
                Some("retrain_model"),
            );
        } else if accuracy > thresholds.accuracy_high {
            push(
                &mut insights,
                "success",
                "prediction",
                format!("Prediction accuracy is healthy at {:.1}%.", accuracy * 100.0),
                None,
            );
        }
    }

    if let Some(hour) = predictions.best_prediction_hour {
        push(
            &mut insights,
            "info",
            "timing",
            format!("Predictions made at {hour:02}:00 have been the most accurate."),
            Some("adjust_trading_time"),
        );
    }

    push(
        &mut insights,
        "recommendation",
        "confidence",
        format!(
            "Optimal confidence threshold is {:.1}.",
            predictions.optimal_confidence_threshold
        ),
        Some("update_confidence_threshold"),
    );

    if trading.sell_trades > 0 {
        if trading.win_rate < thresholds.win_rate_low {
            push(
                &mut insights,
                "warning",
                "trading",
                format!("Win rate is low at {:.1}%. Review the entry strategy.", trading.win_rate * 100.0),
                Some("review_entry_strategy"),
            );
        } else if trading.profit_factor > thresholds.profit_factor_good {
            push(
                &mut insights,
                "success",
                "trading",
                format!("Profit factor of {:.2} is strong.", trading.profit_factor),
                None,
            );
        }
    }

    if !risk_section.no_data {
        if risk_section.metrics.sharpe_ratio < thresholds.sharpe_low {
            push(
                &mut insights,
                "warning",
                "risk",
                format!(
                    "Sharpe ratio of {:.2} means returns are thin for the risk taken.",
                    risk_section.metrics.sharpe_ratio
                ),
                Some("improve_risk_management"),
            );
        }
        // metrics.max_drawdown is a display percentage.
        if risk_section.metrics.max_drawdown.abs() > thresholds.drawdown_warning * 100.0 {
            push(
                &mut insights,
                "alert",
                "risk",
                format!(
                    "Max drawdown reached {:.1}%. Consider reducing position sizes.",
                    risk_section.metrics.max_drawdown.abs()
                ),
                Some("reduce_position_size"),
            );
        }
    }

    if let Some(sector) = &sectors.best_performing_sector {
        push(
            &mut insights,
            "recommendation",
            "sector",
            format!("{sector} has been the most profitable sector."),
            Some("focus_on_sector"),
        );
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::Ticker;

    fn finalized_prediction(
        confidence: f64,
        correct: bool,
        return_1d: f64,
        hour: u32,
    ) -> Prediction {
        let mut p = Prediction::new(
            Ticker::new("005930"),
            Utc::now()
                .date_naive()
                .and_hms_opt(hour, 0, 0)
                .unwrap()
                .and_utc()
                - Duration::days(5),
            PredictedDirection::Up,
            0.7,
            1.0,
            confidence,
        );
        p.status = if correct {
            PredictionStatus::Correct
        } else {
            PredictionStatus::Incorrect
        };
        p.actual_return_1d = Some(return_1d);
        p.actual_return_3d = Some(return_1d);
        p.actual_return_7d = Some(-return_1d);
        p
    }

    #[test]
    fn test_prediction_accuracy_and_buckets() {
        let predictions = vec![
            finalized_prediction(0.85, true, 1.0, 9),
            finalized_prediction(0.85, true, 2.0, 9),
            finalized_prediction(0.65, false, -1.0, 14),
            finalized_prediction(0.55, true, 0.5, 14),
        ];
        let analysis = analyze_predictions(&predictions);

        assert_eq!(analysis.summary.total_predictions, 4);
        assert_eq!(analysis.summary.correct_predictions, 3);
        assert!((analysis.summary.accuracy_rate - 0.75).abs() < 1e-9);
        assert_eq!(analysis.best_prediction_hour, Some(9));

        let very_high = analysis
            .confidence_buckets
            .iter()
            .find(|b| b.level == "very_high")
            .unwrap();
        assert_eq!(very_high.predictions, 2);
        assert!((very_high.accuracy - 1.0).abs() < 1e-9);

        // 7d returns flipped sign, so the 7d horizon disagrees with 1d.
        assert!(analysis.horizon_accuracy.one_day > analysis.horizon_accuracy.seven_days);
    }

    #[test]
    fn test_optimal_confidence_prefers_populated_buckets() {
        // 60%-accurate bucket with 50 samples should beat a perfect
        // bucket holding a single prediction.
        let buckets = vec![
            ConfidenceBucket {
                level: "very_high".to_string(),
                predictions: 1,
                accuracy: 1.0,
                avg_actual_return_1d: 2.0,
            },
            ConfidenceBucket {
                level: "medium".to_string(),
                predictions: 50,
                accuracy: 0.6,
                avg_actual_return_1d: 0.5,
            },
        ];
        assert_eq!(find_optimal_confidence(&buckets), 0.6);
    }

    #[test]
    fn test_profit_factor_uses_sums() {
        let sell = |pnl: f64| -> Trade {
            Trade {
                id: None,
                ref_id: "TRD_t".to_string(),
                prediction_id: None,
                ticker: Ticker::new("005930"),
                action: TradingAction::Sell,
                trade_date: Utc::now(),
                price: 100.0,
                quantity: 1,
                total_value: 100.0,
                position_before: 1,
                position_after: 0,
                cash_before: 0.0,
                cash_after: 0.0,
                realized_pnl: pnl,
                commission: 1.0,
            }
        };

        let trades = vec![sell(300.0), sell(100.0), sell(-200.0)];
        let analysis = analyze_trading(&trades, &[], Utc::now() - Duration::days(10), Utc::now());

        assert_eq!(analysis.sell_trades, 3);
        assert!((analysis.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((analysis.profit_factor - 400.0 / 200.0).abs() < 1e-9);
        assert!((analysis.avg_loss - (-200.0)).abs() < 1e-9);
    }

    #[test]
    fn test_insight_taxonomy() {
        let mut predictions = PredictionAnalysis::default();
        predictions.summary.total_predictions = 20;
        predictions.summary.accuracy_rate = 0.42;
        predictions.optimal_confidence_threshold = 0.7;

        let mut trading = TradingAnalysis::default();
        trading.sell_trades = 10;
        trading.win_rate = 0.3;

        let risk_section = RiskSection {
            no_data: false,
            error: None,
            metrics: RiskReport {
                no_data: false,
                sharpe_ratio: 0.2,
                max_drawdown: -25.0,
                ..RiskReport::default()
            },
            drawdown_analysis: DrawdownAnalysis::default(),
        };

        let insights = generate_insights(
            &predictions,
            &trading,
            &risk_section,
            &SectorAnalysis::default(),
            &AlertThresholds::default(),
        );

        let categories: Vec<&str> = insights.iter().map(|i| i.category.as_str()).collect();
        assert!(categories.contains(&"prediction"));
        assert!(categories.contains(&"trading"));
        assert!(categories.contains(&"risk"));
        assert!(categories.contains(&"confidence"));

        let alert = insights.iter().find(|i| i.kind == "alert").unwrap();
        assert_eq!(alert.category, "risk");
        assert_eq!(alert.action.as_deref(), Some("reduce_position_size"));
    }

    #[test]
    fn test_empty_period_degrades_to_no_data() {
        let analysis = analyze_predictions(&[]);
        assert_eq!(analysis.summary.total_predictions, 0);
        assert_eq!(analysis.summary.accuracy_rate, 0.0);

        let trading = analyze_trading(&[], &[], Utc::now() - Duration::days(1), Utc::now());
        assert_eq!(trading.total_trades, 0);
        assert_eq!(trading.profit_factor, 0.0);
    }
}
