//! Metrics engine: turns an ordered trade-return list into an equity
//! curve and a full performance-statistics record.
//!
//! All formulas operate on fractional returns; `*_pct` fields are the
//! same quantity scaled by 100 for persistence and display. Metrics that
//! are undefined for the given inputs (no losing trades, zero variance,
//! too few losers) are `None`, never a sentinel value.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::drawdown::analyze_drawdown;

// ============================================================
// TRADES AND EQUITY
// ============================================================

/// One realized entry -> exit observation of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeReturn {
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    /// Fractional return: (exit_price - entry_price) / entry_price.
    pub value: f64,
}

impl TradeReturn {
    pub fn new(entry_time: NaiveDateTime, exit_time: NaiveDateTime, value: f64) -> Self {
        Self {
            entry_time,
            exit_time,
            value,
        }
    }
}

/// One point of a compounded equity trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Cumulative compounding of a trade list: a unit investment follows
/// every trade in chronological order.
///
/// Point `i` holds the equity AFTER trade `i`, stamped with the trade's
/// exit time; the implicit starting equity is [`EquityCurve::INITIAL`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub const INITIAL: f64 = 1.0;

    pub fn from_trades(trades: &[TradeReturn]) -> Self {
        let mut equity = Self::INITIAL;
        let points = trades
            .iter()
            .map(|t| {
                equity *= 1.0 + t.value;
                EquityPoint {
                    timestamp: t.exit_time,
                    equity,
                }
            })
            .collect();
        Self { points }
    }

    /// Rebuild a curve from persisted points (sorted by timestamp).
    pub fn from_points(mut points: Vec<EquityPoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self { points }
    }

    #[inline]
    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ============================================================
// STATISTICS
// ============================================================

/// Aggregate performance metrics for one pattern x asset x lookback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStatistics {
    pub gross_profit_pct: f64,
    pub gross_loss_pct: f64,
    pub net_return_pct: f64,
    /// Fraction of trades with a strictly positive return, in [0, 1].
    pub win_rate: f64,
    /// gross_profit / gross_loss; `None` when there are no losses.
    pub profit_factor: Option<f64>,
    pub expectancy: f64,
    /// mean/std * sqrt(n); `None` when the returns have zero variance.
    pub sharpe_ratio: Option<f64>,
    /// mean/std(losses) * sqrt(n); `None` with fewer than 2 losing
    /// trades, or when the losses are identical (zero downside variance
    /// would put the ratio at infinity).
    pub sortino_ratio: Option<f64>,
    pub annual_volatility_pct: f64,
    pub num_trades: u32,
    pub avg_trade_pct: f64,
    pub max_consec_wins: u32,
    pub max_consec_losses: u32,
    /// Worst peak-to-trough excursion, always <= 0.
    pub max_drawdown_pct: f64,
    pub drawdown_start: NaiveDateTime,
    pub drawdown_end: NaiveDateTime,
    /// Days from trough back to the prior peak; `None` = never recovered
    /// within the series.
    pub recovery_days: Option<i64>,
}

/// Compute the statistics record and equity curve for an ordered trade
/// list. Returns `None` for an empty list: no trades means nothing to
/// report, which is not an error.
pub fn compute_statistics(
    trades: &[TradeReturn],
) -> Option<(PerformanceStatistics, EquityCurve)> {
    if trades.is_empty() {
        return None;
    }

    let curve = EquityCurve::from_trades(trades);
    let returns: Vec<f64> = trades.iter().map(|t| t.value).collect();
    let n = returns.len() as f64;

    let gross_profit: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let gross_loss: f64 = returns.iter().filter(|&&r| r < 0.0).sum::<f64>().abs();
    let net: f64 = returns.iter().sum();

    let wins = returns.iter().filter(|&&r| r > 0.0).count();
    let losses = returns.iter().filter(|&&r| r < 0.0).count();
    let win_rate = wins as f64 / n;

    let profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);

    let mean_win = if wins > 0 {
        gross_profit / wins as f64
    } else {
        0.0
    };
    let mean_loss = if losses > 0 {
        gross_loss / losses as f64
    } else {
        0.0
    };
    let expectancy = win_rate * mean_win - (1.0 - win_rate) * mean_loss;

    let mean = net / n;
    let std = population_std(&returns, mean);
    let sqrt_n = n.sqrt();
    let sharpe_ratio = (std > f64::EPSILON).then(|| mean / std * sqrt_n);

    let negative: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    let sortino_ratio = (negative.len() >= 2)
        .then(|| {
            let neg_mean = negative.iter().sum::<f64>() / negative.len() as f64;
            let neg_std = population_std(&negative, neg_mean);
            (neg_std > f64::EPSILON).then(|| mean / neg_std * sqrt_n)
        })
        .flatten();

    let (max_consec_wins, max_consec_losses) = longest_runs(&returns);

    let episode = analyze_drawdown(&curve).expect("non-empty curve has a drawdown episode");

    let stats = PerformanceStatistics {
        gross_profit_pct: 100.0 * gross_profit,
        gross_loss_pct: 100.0 * gross_loss,
        net_return_pct: 100.0 * net,
        win_rate,
        profit_factor,
        expectancy,
        sharpe_ratio,
        sortino_ratio,
        annual_volatility_pct: 100.0 * std * sqrt_n,
        num_trades: returns.len() as u32,
        avg_trade_pct: 100.0 * mean,
        max_consec_wins,
        max_consec_losses,
        max_drawdown_pct: episode.max_drawdown_pct,
        drawdown_start: episode.peak_time,
        drawdown_end: episode.trough_time,
        recovery_days: episode.recovery_days,
    };

    Some((stats, curve))
}

/// Population standard deviation (ddof = 0).
fn population_std(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Longest run of consecutive wins and of consecutive losses. A return
/// of exactly zero is neither and breaks both streaks.
fn longest_runs(returns: &[f64]) -> (u32, u32) {
    let mut max_wins = 0u32;
    let mut max_losses = 0u32;
    let mut wins = 0u32;
    let mut losses = 0u32;
    for &r in returns {
        if r > 0.0 {
            wins += 1;
            losses = 0;
        } else if r < 0.0 {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

// ============================================================
// TESTS
// ============================================================
