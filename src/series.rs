//! Price series primitives: candles, timeframes, and the validated
//! [`PriceSeries`] container used by the window extractor.

use std::fmt;

use chrono::{Duration, Months, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Result, SeasonError};

// ============================================================
// TIMEFRAME
// ============================================================

/// Supported history timeframes (MT5 naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "M1" => Ok(Timeframe::M1),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            "MN1" => Ok(Timeframe::MN1),
            other => Err(SeasonError::UnknownTimeframe(other.to_string())),
        }
    }

    /// Resample bucket width in minutes. Weeks and months have no
    /// fixed-width grid and return `None`.
    pub fn resample_minutes(self) -> Option<u32> {
        match self {
            Timeframe::M1 => Some(1),
            Timeframe::H1 => Some(60),
            Timeframe::H4 => Some(240),
            Timeframe::D1 => Some(1440),
            Timeframe::W1 | Timeframe::MN1 => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// CANDLE
// ============================================================

/// One OHLC observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(timestamp: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }

    fn validate(&self) -> std::result::Result<(), &'static str> {
        let fields = [self.open, self.high, self.low, self.close];
        if fields.iter().any(|v| v.is_nan()) {
            return Err("NaN in OHLC");
        }
        if fields.iter().any(|v| v.is_infinite()) {
            return Err("infinite value in OHLC");
        }
        if self.high < self.low {
            return Err("high < low");
        }
        Ok(())
    }
}

// ============================================================
// PRICE SERIES
// ============================================================

/// One asset's OHLC history at one timeframe.
///
/// Timestamps are strictly increasing and unique; construction sorts the
/// input and rejects duplicates, so any `PriceSeries` in hand satisfies
/// the invariant. The series is immutable for the lifetime of a job.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    candles: Vec<Candle>,
    timeframe: Timeframe,
}

impl PriceSeries {
    /// Build a series from unordered candles. Sorts ascending by
    /// timestamp and rejects duplicate timestamps and non-finite prices.
    pub fn new(mut candles: Vec<Candle>, timeframe: Timeframe) -> Result<Self> {
        candles.sort_by_key(|c| c.timestamp);
        for (i, c) in candles.iter().enumerate() {
            c.validate()
                .map_err(|reason| SeasonError::InvalidSeries { index: i, reason })?;
            if i > 0 && candles[i - 1].timestamp == c.timestamp {
                return Err(SeasonError::InvalidSeries {
                    index: i,
                    reason: "duplicate timestamp",
                });
            }
        }
        Ok(Self { candles, timeframe })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    #[inline]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Clip to the trailing `[last - years, last]` window.
    ///
    /// The lower bound is a calendar offset (month arithmetic with
    /// end-of-month clamping), matching how the lookback horizon is
    /// defined for pattern jobs.
    pub fn clip_lookback(&self, years: u32) -> PriceSeries {
        let Some(last) = self.candles.last() else {
            return self.clone();
        };
        let start = last
            .timestamp
            .checked_sub_months(Months::new(years * 12))
            .unwrap_or(NaiveDateTime::MIN);
        let from = self.candles.partition_point(|c| c.timestamp < start);
        PriceSeries {
            candles: self.candles[from..].to_vec(),
            timeframe: self.timeframe,
        }
    }

    /// Resample the close price onto a fixed `step_minutes` grid,
    /// forward-filling empty buckets.
    ///
    /// Bucket edges are anchored at midnight of the first candle's day
    /// and labeled by their left edge; each bucket takes the last close
    /// observed inside it. This mirrors a left-labeled last/ffill
    /// downsample, so gaps in the raw series become repeated closes
    /// rather than holes.
    pub fn resample_close(&self, step_minutes: u32) -> Vec<(NaiveDateTime, f64)> {
        let Some(first) = self.candles.first() else {
            return Vec::new();
        };
        let last = self.candles.last().expect("non-empty");

        let step = i64::from(step_minutes) * 60;
        let origin = first
            .timestamp
            .date()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid");
        let bucket_of = |ts: NaiveDateTime| (ts - origin).num_seconds().div_euclid(step);

        let first_bucket = bucket_of(first.timestamp);
        let last_bucket = bucket_of(last.timestamp);

        let mut out = Vec::with_capacity((last_bucket - first_bucket + 1) as usize);
        let mut iter = self.candles.iter().peekable();
        let mut fill = first.close;
        for k in first_bucket..=last_bucket {
            while let Some(c) = iter.peek() {
                if bucket_of(c.timestamp) <= k {
                    fill = c.close;
                    iter.next();
                } else {
                    break;
                }
            }
            out.push((origin + Duration::seconds(k * step), fill));
        }
        out
    }
}

/// Seconds since midnight for a grid timestamp; used when slicing an
/// intraday hour window out of a resampled day.
pub(crate) fn seconds_from_midnight(ts: NaiveDateTime) -> u32 {
    ts.time().num_seconds_from_midnight()
}

// ============================================================
// TESTS
// ============================================================
