//! History loader: reads exported OHLC artifacts from a directory tree
//! laid out as `<root>/<group>/<symbol>/<SYMBOL>_<TF>.{json,csv}`.
//!
//! The JSON form is columnar (one array per field), the CSV form is one
//! row per candle; the loader tries JSON first and falls back to CSV.
//! Either way the rows pass through [`PriceSeries::new`], so callers
//! always receive a sorted, validated series.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::series::{Candle, PriceSeries, Timeframe};
use crate::{Result, SeasonError};

/// Filesystem-backed loader for precomputed history artifacts.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    root: PathBuf,
}

impl HistoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load one symbol's history at one timeframe.
    ///
    /// Errors: [`SeasonError::DataUnavailable`] when neither artifact
    /// exists, [`SeasonError::EmptySeries`] when an artifact parses to
    /// zero rows.
    pub fn load(&self, group: &str, symbol: &str, timeframe: Timeframe) -> Result<PriceSeries> {
        let json_path = self.artifact_path(group, symbol, timeframe, "json");
        let csv_path = self.artifact_path(group, symbol, timeframe, "csv");

        let candles = if json_path.is_file() {
            debug!(path = %json_path.display(), "loading columnar history");
            read_columnar(&json_path)?
        } else if csv_path.is_file() {
            debug!(path = %csv_path.display(), "loading csv history");
            read_csv(&csv_path)?
        } else {
            return Err(SeasonError::DataUnavailable {
                group: group.to_string(),
                symbol: symbol.to_string(),
                timeframe,
            });
        };

        if candles.is_empty() {
            return Err(SeasonError::EmptySeries {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        PriceSeries::new(candles, timeframe)
    }

    /// Whether any artifact exists for the (group, symbol, timeframe).
    pub fn available(&self, group: &str, symbol: &str, timeframe: Timeframe) -> bool {
        self.artifact_path(group, symbol, timeframe, "json").is_file()
            || self.artifact_path(group, symbol, timeframe, "csv").is_file()
    }

    fn artifact_path(&self, group: &str, symbol: &str, tf: Timeframe, ext: &str) -> PathBuf {
        self.root
            .join(group)
            .join(symbol)
            .join(format!("{symbol}_{tf}.{ext}"))
    }
}

// ============================================================
// FORMATS
// ============================================================

/// Columnar JSON artifact: parallel arrays, one per field.
#[derive(Debug, Deserialize)]
struct ColumnarHistory {
    #[serde(alias = "time")]
    timestamp: Vec<String>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
}

fn read_columnar(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    let cols: ColumnarHistory = serde_json::from_reader(BufReader::new(file))?;

    let n = cols.timestamp.len();
    if cols.open.len() != n || cols.high.len() != n || cols.low.len() != n || cols.close.len() != n
    {
        return Err(SeasonError::Computation(format!(
            "ragged columnar history in {}",
            path.display()
        )));
    }

    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        candles.push(Candle::new(
            parse_timestamp(&cols.timestamp[i])?,
            cols.open[i],
            cols.high[i],
            cols.low[i],
            cols.close[i],
        ));
    }
    Ok(candles)
}

/// CSV artifact row. Headers may use `time` or `timestamp`.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "time")]
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

fn read_csv(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let mut candles = Vec::new();
    for row in reader.deserialize() {
        let row: CsvRow = row?;
        candles.push(Candle::new(
            parse_timestamp(&row.timestamp)?,
            row.open,
            row.high,
            row.low,
            row.close,
        ));
    }
    Ok(candles)
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated variant, and bare
/// dates (interpreted as midnight).
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    Err(SeasonError::Timestamp(raw.to_string()))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_artifact(root: &Path, group: &str, symbol: &str, name: &str, body: &str) {
        let dir = root.join(group).join(symbol);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_columnar_json() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(
            tmp.path(),
            "forex",
            "EURUSD",
            "EURUSD_D1.json",
            r#"{"time":["2024-01-02","2024-01-01"],
                "open":[1.1,1.0],"high":[1.2,1.1],"low":[1.0,0.9],"close":[1.15,1.05]}"#,
        );
        let loader = HistoryLoader::new(tmp.path());
        let series = loader.load("forex", "EURUSD", Timeframe::D1).unwrap();
        assert_eq!(series.len(), 2);
        // sorted on construction
        assert!((series.first().unwrap().close - 1.05).abs() < 1e-12);
    }

    #[test]
    fn test_load_csv_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(
            tmp.path(),
            "indices",
            "SPX",
            "SPX_D1.csv",
            "timestamp,open,high,low,close\n2024-01-01 00:00:00,4700,4720,4690,4710\n",
        );
        let loader = HistoryLoader::new(tmp.path());
        let series = loader.load("indices", "SPX", Timeframe::D1).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.timeframe(), Timeframe::D1);
    }

    #[test]
    fn test_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = HistoryLoader::new(tmp.path());
        assert!(matches!(
            loader.load("forex", "EURUSD", Timeframe::H1),
            Err(SeasonError::DataUnavailable { .. })
        ));
        assert!(!loader.available("forex", "EURUSD", Timeframe::H1));
    }

    #[test]
    fn test_empty_artifact_is_distinct_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(
            tmp.path(),
            "forex",
            "EURUSD",
            "EURUSD_D1.json",
            r#"{"time":[],"open":[],"high":[],"low":[],"close":[]}"#,
        );
        let loader = HistoryLoader::new(tmp.path());
        assert!(matches!(
            loader.load("forex", "EURUSD", Timeframe::D1),
            Err(SeasonError::EmptySeries { .. })
        ));
        assert!(loader.available("forex", "EURUSD", Timeframe::D1));
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(
            tmp.path(),
            "forex",
            "EURUSD",
            "EURUSD_D1.json",
            r#"{"time":["2024-01-01"],"open":[1.0,2.0],"high":[1.1],"low":[0.9],"close":[1.05]}"#,
        );
        let loader = HistoryLoader::new(tmp.path());
        assert!(loader.load("forex", "EURUSD", Timeframe::D1).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-01-01 09:30:00").is_ok());
        assert!(parse_timestamp("2024-01-01T09:30:00").is_ok());
        assert_eq!(
            parse_timestamp("2024-01-01").unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert!(matches!(
            parse_timestamp("01/02/2024"),
            Err(SeasonError::Timestamp(_))
        ));
    }
}
