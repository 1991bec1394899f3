//! Drawdown analysis over an equity curve.
//!
//! Finds the single worst peak-to-trough episode: the running-peak
//! excursion is computed at every point, the trough is the first point
//! attaining the global minimum, and recovery is the first later point
//! that regains the peak equity.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::metrics::EquityCurve;

/// The worst realized drawdown episode of an equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownEpisode {
    pub peak_index: usize,
    pub trough_index: usize,
    pub peak_time: NaiveDateTime,
    pub trough_time: NaiveDateTime,
    /// Peak-to-trough excursion in percent, always <= 0. A monotone
    /// curve reports 0 with peak == trough.
    pub max_drawdown_pct: f64,
    /// Days between the trough and the first point at or above the peak
    /// equity again; `None` while the drawdown is still open at the end
    /// of the curve.
    pub recovery_days: Option<i64>,
}

/// Locate the worst drawdown episode. Returns `None` for an empty curve.
pub fn analyze_drawdown(curve: &EquityCurve) -> Option<DrawdownEpisode> {
    let points = curve.points();
    let first = points.first()?;

    let mut peak = first.equity;
    let mut peak_index = 0usize;

    let mut worst = 0.0f64;
    let mut worst_peak_index = 0usize;
    let mut worst_trough_index = 0usize;

    for (i, p) in points.iter().enumerate() {
        if p.equity > peak {
            peak = p.equity;
            peak_index = i;
        }
        let excursion = (p.equity - peak) / peak;
        // strict < keeps the FIRST trough attaining the minimum
        if excursion < worst {
            worst = excursion;
            worst_peak_index = peak_index;
            worst_trough_index = i;
        }
    }

    let peak_equity = points[worst_peak_index].equity;
    let trough = points[worst_trough_index];
    // a flat-or-rising curve has no episode to recover from
    let recovery_days = (worst < 0.0)
        .then(|| {
            points[worst_trough_index + 1..]
                .iter()
                .find(|p| p.equity >= peak_equity)
                .map(|p| (p.timestamp - trough.timestamp).num_days())
        })
        .flatten();

    Some(DrawdownEpisode {
        peak_index: worst_peak_index,
        trough_index: worst_trough_index,
        peak_time: points[worst_peak_index].timestamp,
        trough_time: trough.timestamp,
        max_drawdown_pct: 100.0 * worst,
        recovery_days,
    })
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EquityPoint;
    use chrono::NaiveDate;

    fn curve(values: &[f64]) -> EquityCurve {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: NaiveDate::from_ymd_opt(2020, 1, 1)
                    .unwrap()
                    .checked_add_days(chrono::Days::new(i as u64))
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                equity,
            })
            .collect();
        EquityCurve::from_points(points)
    }

    #[test]
    fn test_empty_curve() {
        assert!(analyze_drawdown(&EquityCurve::default()).is_none());
    }

    #[test]
    fn test_monotone_rise_has_zero_drawdown() {
        let ep = analyze_drawdown(&curve(&[1.0, 1.1, 1.2, 1.3])).unwrap();
        assert_eq!(ep.max_drawdown_pct, 0.0);
        assert_eq!(ep.peak_index, ep.trough_index);
        assert_eq!(ep.recovery_days, None);
    }

    #[test]
    fn test_simple_episode_with_recovery() {
        // peak 1.2 at index 1, trough 0.9 at index 3, recovered at index 5
        let ep = analyze_drawdown(&curve(&[1.0, 1.2, 1.0, 0.9, 1.1, 1.25])).unwrap();
        assert_eq!(ep.peak_index, 1);
        assert_eq!(ep.trough_index, 3);
        assert!((ep.max_drawdown_pct - 100.0 * (0.9 - 1.2) / 1.2).abs() < 1e-9);
        assert_eq!(ep.recovery_days, Some(2));
    }

    #[test]
    fn test_unrecovered_episode() {
        let ep = analyze_drawdown(&curve(&[1.0, 1.5, 0.8, 1.2])).unwrap();
        assert_eq!(ep.peak_index, 1);
        assert_eq!(ep.trough_index, 2);
        assert_eq!(ep.recovery_days, None);
    }

    #[test]
    fn test_first_of_equal_troughs_wins() {
        let ep = analyze_drawdown(&curve(&[1.0, 0.8, 0.9, 0.8])).unwrap();
        assert_eq!(ep.trough_index, 1);
    }

    #[test]
    fn test_picks_deepest_of_two_episodes() {
        // -10% then -25%
        let ep = analyze_drawdown(&curve(&[1.0, 0.9, 1.2, 0.9, 1.3])).unwrap();
        assert_eq!(ep.peak_index, 2);
        assert_eq!(ep.trough_index, 3);
        assert!((ep.max_drawdown_pct - 100.0 * (0.9 - 1.2) / 1.2).abs() < 1e-9);
        assert_eq!(ep.recovery_days, Some(1));
    }
}
