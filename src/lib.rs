//! # seasonstats - Seasonality Pattern Statistics Engine
//!
//! Discovers recurring calendar-based and intraday price patterns in
//! historical OHLC series and computes a standardized performance
//! package for each one: trade returns, equity curve, risk/return
//! ratios, and drawdown episodes.
//!
//! ## Quick Start
//!
//! ```rust
//! use seasonstats::prelude::*;
//! use chrono::NaiveDate;
//!
//! // Synthetic daily close series, rising 0.1% per day.
//! let candles: Vec<Candle> = (0..400)
//!     .map(|i| {
//!         let ts = NaiveDate::from_ymd_opt(2020, 3, 1)
//!             .unwrap()
//!             .checked_add_days(chrono::Days::new(i))
//!             .unwrap()
//!             .and_hms_opt(0, 0, 0)
//!             .unwrap();
//!         let px = 100.0 * 1.001_f64.powi(i as i32);
//!         Candle::new(ts, px, px, px, px)
//!     })
//!     .collect();
//! let series = PriceSeries::new(candles, Timeframe::D1).unwrap();
//!
//! // One annual pattern: long from Jun 1 to Dec 28, every year.
//! let def = PatternDefinition::Annual {
//!     start_month: 6,
//!     start_day: 1,
//!     end_month: 12,
//!     end_day: 28,
//! };
//!
//! let trades = extract_trades(&series, &def, 5).unwrap();
//! let (stats, _equity) = compute_statistics(&trades).unwrap();
//! assert_eq!(stats.num_trades, 1);
//! ```
//!
//! The [`batch`] module fans the full (asset x definition x lookback)
//! job space out across a rayon worker pool and persists results
//! through the [`store`] gateway.

pub mod batch;
pub mod drawdown;
pub mod extract;
pub mod history;
pub mod metrics;
pub mod patterns;
pub mod series;
pub mod store;

pub mod prelude {
    pub use crate::{
        // Orchestrator
        batch::{run_batch, BatchConfig, CancelToken, RunSummary},
        // Drawdown
        drawdown::{analyze_drawdown, DrawdownEpisode},
        // Extraction
        extract::extract_trades,
        // History
        history::HistoryLoader,
        // Metrics
        metrics::{
            compute_statistics, EquityCurve, EquityPoint, PerformanceStatistics, TradeReturn,
        },
        // Definitions
        patterns::{
            annual_definitions, intraday_definitions, intraday_definitions_spanning,
            monthly_definitions, PatternDefinition, PatternFamily,
        },
        // Series
        series::{Candle, PriceSeries, Timeframe},
        // Persistence
        store::{PatternResult, PatternStore, SqliteGateway, SqliteStore, StoreOpener},
        // Errors
        Result,
        SeasonError,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, SeasonError>;

/// Errors that can occur during loading, extraction, computation,
/// or persistence.
///
/// Invalid pattern parameters are deliberately NOT an error: extraction
/// returns an empty trade list for them and no record is persisted.
#[derive(Debug, thiserror::Error)]
pub enum SeasonError {
    #[error("no history artifact for {group}/{symbol} {timeframe}")]
    DataUnavailable {
        group: String,
        symbol: String,
        timeframe: series::Timeframe,
    },

    #[error("history for {symbol} {timeframe} contains zero rows")]
    EmptySeries {
        symbol: String,
        timeframe: series::Timeframe,
    },

    #[error("unknown timeframe: {0:?}")]
    UnknownTimeframe(String),

    #[error("timeframe {0} has no fixed resample grid")]
    UnsupportedTimeframe(series::Timeframe),

    #[error("invalid series at row {index}: {reason}")]
    InvalidSeries { index: usize, reason: &'static str },

    #[error("cannot parse timestamp {0:?}")]
    Timestamp(String),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("columnar history decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv history decode error: {0}")]
    Csv(#[from] csv::Error),
}
