//! Risk metrics over a daily return series
//!
//! All functions take returns as fractions (0.01 = 1%) and stay in
//! fractional units; scaling to percent happens once, in [`RiskReport`],
//! at the display boundary.

use serde::{Deserialize, Serialize};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0), matching numpy's default.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile with linear interpolation between order statistics,
/// matching numpy's default method.
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Annualized volatility: `stddev(returns) * sqrt(252)`.
pub fn volatility(returns: &[f64]) -> f64 {
    std_dev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Deepest peak-to-trough decline of the cumulative product `Π(1+r)`,
/// as a negative fraction (0 when the series never declines).
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut peak = 1.0;
    let mut worst = 0.0f64;

    for r in returns {
        cumulative *= 1.0 + r;
        if cumulative > peak {
            peak = cumulative;
        }
        let drawdown = (cumulative - peak) / peak;
        worst = worst.min(drawdown);
    }
    worst
}

/// Annualized Sharpe ratio over daily excess returns; 0 when the
/// denominator vanishes.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let sd = std_dev(&excess);
    if sd > 0.0 {
        mean(&excess) / sd * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Sortino ratio: same numerator as Sharpe, denominator restricted to the
/// sub-risk-free observations; 0 when there is no downside.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < daily_rf).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_sd = std_dev(&downside);
    if downside_sd > 0.0 {
        mean(&excess) / downside_sd * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Compound-annualized return of the series: `(Π(1+r))^(252/n) - 1`.
pub fn annualized_return(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let total: f64 = returns.iter().map(|r| 1.0 + r).product();
    if total <= 0.0 {
        return -1.0;
    }
    total.powf(TRADING_DAYS_PER_YEAR / returns.len() as f64) - 1.0
}

/// Calmar ratio: annualized return over |max drawdown|; 0 on a flat peak.
pub fn calmar_ratio(returns: &[f64]) -> f64 {
    let dd = max_drawdown(returns);
    if dd == 0.0 {
        return 0.0;
    }
    annualized_return(returns) / dd.abs()
}

/// 95% Value at Risk: the 5th percentile of the return distribution.
pub fn var_95(returns: &[f64]) -> f64 {
    percentile(returns, 5.0)
}

/// 95% Conditional VaR: mean of the returns at or below VaR. Falls back
/// to VaR itself when the tail set is empty.
pub fn cvar_95(returns: &[f64]) -> f64 {
    let var = var_95(returns);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        var
    } else {
        mean(&tail)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Display-scaled risk metrics: ratios rounded to 2 decimals, percentages
/// scaled ×100.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RiskReport {
    /// True when the return series was too short to say anything.
    pub no_data: bool,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

impl RiskReport {
    pub fn from_returns(returns: &[f64], risk_free_rate: f64) -> Self {
        if returns.len() < 2 {
            return Self {
                no_data: true,
                ..Self::default()
            };
        }
        Self {
            no_data: false,
            volatility: round2(volatility(returns) * 100.0),
            max_drawdown: round2(max_drawdown(returns) * 100.0),
            sharpe_ratio: round2(sharpe_ratio(returns, risk_free_rate)),
            sortino_ratio: round2(sortino_ratio(returns, risk_free_rate)),
            calmar_ratio: round2(calmar_ratio(returns)),
            var_95: round2(var_95(returns) * 100.0),
            cvar_95: round2(cvar_95(returns) * 100.0),
        }
    }
}

/// One completed peak-to-trough episode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrawdownEpisode {
    /// Index into the series where the decline began.
    pub start_index: usize,
    /// Index where the series regained its peak (or the last index).
    pub end_index: usize,
    /// Depth as a negative fraction.
    pub depth: f64,
    pub duration: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    pub max_drawdown: f64,
    pub avg_drawdown: f64,
    pub total_episodes: usize,
    pub avg_duration: f64,
    pub current_drawdown: f64,
    pub episodes: Vec<DrawdownEpisode>,
}

/// Walks the cumulative equity curve and extracts drawdown episodes.
/// Reports at most the five deepest.
pub fn analyze_drawdowns(returns: &[f64]) -> DrawdownAnalysis {
    let mut cumulative = 1.0;
    let mut peak = 1.0;
    let mut episodes: Vec<DrawdownEpisode> = Vec::new();
    let mut current_depth = 0.0f64;
    let mut episode_start: Option<usize> = None;

    for (i, r) in returns.iter().enumerate() {
        cumulative *= 1.0 + r;
        if cumulative > peak {
            if let Some(start) = episode_start.take() {
                episodes.push(DrawdownEpisode {
                    start_index: start,
                    end_index: i,
                    depth: current_depth,
                    duration: i - start,
                });
            }
            peak = cumulative;
            current_depth = 0.0;
        } else if cumulative < peak {
            let drawdown = (cumulative - peak) / peak;
            if episode_start.is_none() {
                episode_start = Some(i);
            }
            current_depth = current_depth.min(drawdown);
        }
    }

    let open_depth = if episode_start.is_some() { current_depth } else { 0.0 };
    if let Some(start) = episode_start {
        episodes.push(DrawdownEpisode {
            start_index: start,
            end_index: returns.len().saturating_sub(1),
            depth: current_depth,
            duration: returns.len().saturating_sub(1) - start,
        });
    }

    let max_dd = episodes.iter().map(|e| e.depth).fold(0.0f64, f64::min);
    let avg_dd = if episodes.is_empty() {
        0.0
    } else {
        episodes.iter().map(|e| e.depth).sum::<f64>() / episodes.len() as f64
    };
    let avg_duration = if episodes.is_empty() {
        0.0
    } else {
        episodes.iter().map(|e| e.duration as f64).sum::<f64>() / episodes.len() as f64
    };

    let total_episodes = episodes.len();
    episodes.sort_by(|a, b| a.depth.partial_cmp(&b.depth).unwrap_or(std::cmp::Ordering::Equal));
    episodes.truncate(5);

    DrawdownAnalysis {
        max_drawdown: max_dd,
        avg_drawdown: avg_dd,
        total_episodes,
        avg_duration,
        current_drawdown: open_depth,
        episodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETURNS: [f64; 5] = [0.01, -0.02, 0.015, -0.01, 0.005];

    #[test]
    fn test_sharpe_against_reference_vector() {
        // Hand-computed: mean excess = -0.03/252, population std = sqrt(1.7e-4),
        // annualized by sqrt(252) => -0.14494
        let sharpe = sharpe_ratio(&RETURNS, 0.03);
        assert!((sharpe - (-0.14494)).abs() < 1e-4, "sharpe = {sharpe}");
    }

    #[test]
    fn test_max_drawdown_sequence() {
        // Equity [100, 110, 90, 95, 120]: worst drawdown is 90 against the
        // 110 peak = -18.18%.
        let returns = [0.10, -(20.0 / 110.0), 95.0 / 90.0 - 1.0, 120.0 / 95.0 - 1.0];
        let dd = max_drawdown(&returns);
        assert!((dd - (-0.1818)).abs() < 1e-4, "dd = {dd}");
    }

    #[test]
    fn test_var_cvar_interpolation() {
        // Sorted: [-0.02, -0.01, 0.005, 0.01, 0.015]; rank 0.2 between the
        // two worst values.
        let var = var_95(&RETURNS);
        assert!((var - (-0.018)).abs() < 1e-9, "var = {var}");

        // Tail = returns <= -0.018 => only -0.02.
        let cvar = cvar_95(&RETURNS);
        assert!((cvar - (-0.02)).abs() < 1e-9, "cvar = {cvar}");
    }

    #[test]
    fn test_volatility_annualization() {
        let vol = volatility(&RETURNS);
        let expected = (0.00017f64).sqrt() * (252.0f64).sqrt();
        assert!((vol - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sortino_uses_downside_only() {
        let sortino = sortino_ratio(&RETURNS, 0.03);
        // Downside set: returns below 0.03/252 => [-0.02, -0.01, 0.005]? No:
        // 0.005 > 0.000119, so [-0.02, -0.01]. std([-0.02,-0.01]) = 0.005.
        let daily_rf = 0.03 / 252.0;
        let mean_excess = RETURNS.iter().map(|r| r - daily_rf).sum::<f64>() / 5.0;
        let expected = mean_excess / 0.005 * (252.0f64).sqrt();
        assert!((sortino - expected).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_series_yield_zeros() {
        assert_eq!(sharpe_ratio(&[], 0.03), 0.0);
        assert_eq!(sharpe_ratio(&[0.01], 0.03), 0.0);
        assert_eq!(volatility(&[]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
        assert_eq!(calmar_ratio(&[0.0, 0.0, 0.0]), 0.0);
        // All-positive series has no downside observations.
        assert_eq!(sortino_ratio(&[0.01, 0.02, 0.03], 0.0), 0.0);
    }

    #[test]
    fn test_risk_report_scaling_and_no_data() {
        let report = RiskReport::from_returns(&RETURNS, 0.03);
        assert!(!report.no_data);
        // Fractions scaled to percent exactly once.
        assert!((report.max_drawdown - round2(max_drawdown(&RETURNS) * 100.0)).abs() < 1e-9);
        assert!((report.var_95 - (-1.8)).abs() < 1e-9);

        let empty = RiskReport::from_returns(&[], 0.03);
        assert!(empty.no_data);
        assert_eq!(empty.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_drawdown_episodes() {
        // Decline, recovery, second decline left open.
        let returns = [0.10, -0.10, 0.12, 0.05, -0.08, -0.02];
        let analysis = analyze_drawdowns(&returns);
        assert_eq!(analysis.total_episodes, 2);
        assert!(analysis.current_drawdown < 0.0);
        assert!(analysis.max_drawdown <= analysis.avg_drawdown);
    }
}
