//! Window extractor: turns (series, definition, lookback) into the list
//! of realized trade returns, one per window occurrence.
//!
//! Intraday definitions run against a forward-filled fixed-step close
//! grid; monthly and annual definitions snap their calendar targets to
//! the nearest actual trading timestamps in the raw series. In every
//! family a window that cannot produce a strict entry-before-exit pair
//! is silently skipped, so sparse history degrades to fewer trades, not
//! errors.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::trace;

use crate::metrics::TradeReturn;
use crate::patterns::{days_in_month, PatternDefinition};
use crate::series::{seconds_from_midnight, Candle, PriceSeries};
use crate::{Result, SeasonError};

/// Extract all realized trades for `def` from the trailing
/// `lookback_years` of `series`.
///
/// Returns an empty list for an empty series or an invalid definition.
/// The only error cases are structural: an intraday definition against a
/// timeframe with no fixed resample grid (`W1`, `MN1`).
pub fn extract_trades(
    series: &PriceSeries,
    def: &PatternDefinition,
    lookback_years: u32,
) -> Result<Vec<TradeReturn>> {
    if series.is_empty() {
        return Ok(Vec::new());
    }

    match *def {
        PatternDefinition::Intraday {
            start_hour,
            end_hour,
        } => {
            let step = series
                .timeframe()
                .resample_minutes()
                .ok_or(SeasonError::UnsupportedTimeframe(series.timeframe()))?;
            if !def.is_valid() {
                return Ok(Vec::new());
            }
            let clipped = series.clip_lookback(lookback_years);
            Ok(extract_intraday(&clipped, step, start_hour, end_hour))
        }
        PatternDefinition::Monthly {
            start_day,
            window_days,
        } => {
            if !def.is_valid() {
                return Ok(Vec::new());
            }
            let clipped = series.clip_lookback(lookback_years);
            Ok(extract_monthly(&clipped, start_day, window_days))
        }
        PatternDefinition::Annual {
            start_month,
            start_day,
            end_month,
            end_day,
        } => {
            if !def.is_valid() {
                return Ok(Vec::new());
            }
            let clipped = series.clip_lookback(lookback_years);
            Ok(extract_annual(
                &clipped,
                start_month,
                start_day,
                end_month,
                end_day,
            ))
        }
    }
}

// ============================================================
// INTRADAY
// ============================================================

/// One trade per day from the first to the last resampled close inside
/// `[start_hour, end_hour]`. `end_hour == 24` runs through 23:59:59.
fn extract_intraday(
    series: &PriceSeries,
    step_minutes: u32,
    start_hour: u32,
    end_hour: u32,
) -> Vec<TradeReturn> {
    let grid = series.resample_close(step_minutes);
    let start_secs = start_hour * 3600;
    let end_secs = if end_hour == 24 {
        86_399
    } else {
        end_hour * 3600
    };

    let mut trades = Vec::new();
    let mut i = 0;
    while i < grid.len() {
        let date = grid[i].0.date();
        let day_end = grid[i..].partition_point(|(ts, _)| ts.date() == date) + i;

        let mut first: Option<(NaiveDateTime, f64)> = None;
        let mut last: Option<(NaiveDateTime, f64)> = None;
        for &(ts, close) in &grid[i..day_end] {
            let secs = seconds_from_midnight(ts);
            if secs >= start_secs && secs <= end_secs {
                if first.is_none() {
                    first = Some((ts, close));
                }
                last = Some((ts, close));
            }
        }
        if let (Some((entry_time, entry)), Some((exit_time, exit))) = (first, last) {
            // need two distinct samples and a usable entry price
            if entry_time < exit_time && entry.is_finite() && entry != 0.0 {
                trades.push(TradeReturn::new(entry_time, exit_time, (exit - entry) / entry));
            } else {
                trace!(%date, "intraday window skipped: single sample or bad entry price");
            }
        }
        i = day_end;
    }
    trades
}

// ============================================================
// CALENDAR FAMILIES
// ============================================================

/// One trade per (year, month) from `start_day` through
/// `start_day + window_days - 1`; months where the window does not fit
/// are skipped.
fn extract_monthly(series: &PriceSeries, start_day: u32, window_days: u32) -> Vec<TradeReturn> {
    let candles = series.candles();
    // a window longer than any month can never fit
    let Some(end_day) = start_day.checked_add(window_days - 1) else {
        return Vec::new();
    };
    let mut trades = Vec::new();
    for year in year_range(candles) {
        for month in 1..=12u32 {
            let last_day = days_in_month(year, month);
            if start_day > last_day || end_day > last_day {
                continue;
            }
            let Some(window) = calendar_window(year, month, start_day, year, month, end_day) else {
                continue;
            };
            push_snapped(candles, window, &mut trades);
        }
    }
    trades
}

/// One trade per year from `start_month/start_day` through
/// `end_month/end_day`; years where either date does not exist (Feb 29)
/// are skipped.
fn extract_annual(
    series: &PriceSeries,
    start_month: u32,
    start_day: u32,
    end_month: u32,
    end_day: u32,
) -> Vec<TradeReturn> {
    let candles = series.candles();
    let mut trades = Vec::new();
    for year in year_range(candles) {
        let Some(window) = calendar_window(year, start_month, start_day, year, end_month, end_day)
        else {
            continue;
        };
        push_snapped(candles, window, &mut trades);
    }
    trades
}

fn year_range(candles: &[Candle]) -> std::ops::RangeInclusive<i32> {
    match (candles.first(), candles.last()) {
        (Some(f), Some(l)) => f.timestamp.year()..=l.timestamp.year(),
        _ => 1..=0,
    }
}

/// Midnight-anchored target pair, or `None` when a date does not exist
/// or the window is degenerate.
fn calendar_window(
    sy: i32,
    sm: u32,
    sd: u32,
    ey: i32,
    em: u32,
    ed: u32,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::from_ymd_opt(sy, sm, sd)?.and_hms_opt(0, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(ey, em, ed)?.and_hms_opt(0, 0, 0)?;
    (start < end).then_some((start, end))
}

/// Snap the target pair to actual candles (entry forward, exit backward)
/// and record the trade when a strict entry-before-exit pair survives.
fn push_snapped(
    candles: &[Candle],
    (start, end): (NaiveDateTime, NaiveDateTime),
    trades: &mut Vec<TradeReturn>,
) {
    let Some(entry) = next_valid(candles, start) else {
        return;
    };
    let Some(exit) = prev_valid(candles, end) else {
        return;
    };
    if entry.timestamp >= exit.timestamp {
        return;
    }
    if !entry.close.is_finite() || entry.close == 0.0 {
        trace!(window_start = %start, "window skipped: unusable entry price");
        return;
    }
    trades.push(TradeReturn::new(
        entry.timestamp,
        exit.timestamp,
        (exit.close - entry.close) / entry.close,
    ));
}

/// First candle at or after `target`.
fn next_valid(candles: &[Candle], target: NaiveDateTime) -> Option<&Candle> {
    candles.get(candles.partition_point(|c| c.timestamp < target))
}

/// Last candle at or before `target`.
fn prev_valid(candles: &[Candle], target: NaiveDateTime) -> Option<&Candle> {
    let idx = candles.partition_point(|c| c.timestamp <= target);
    (idx > 0).then(|| &candles[idx - 1])
}

// ============================================================
// TESTS
// ============================================================
