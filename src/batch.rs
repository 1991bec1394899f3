//! Batch orchestrator: fans the (asset x definition x lookback) job
//! space out across a rayon worker pool and persists results through a
//! [`StoreOpener`].
//!
//! Failure containment is per job: one bad series or one failed flush is
//! counted and logged, never fatal for the run. Only pool construction
//! errors abort the batch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::extract::extract_trades;
use crate::history::HistoryLoader;
use crate::metrics::compute_statistics;
use crate::patterns::{
    annual_definitions, intraday_definitions, monthly_definitions, PatternDefinition,
    DEFAULT_LOOKBACK_YEARS,
};
use crate::series::{PriceSeries, Timeframe};
use crate::store::{PatternResult, PatternStore, StoreOpener};
use crate::{Result, SeasonError};

// ============================================================
// CONFIG
// ============================================================

/// Batch run configuration, deserializable from a JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Root of the exported history tree.
    pub history_root: PathBuf,
    /// Asset group name -> symbols to scan.
    pub asset_groups: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_lookbacks")]
    pub lookback_years: Vec<u32>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Symbols handed to a worker per store connection.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_intraday_timeframe")]
    pub intraday_timeframe: Timeframe,
    #[serde(default = "default_daily_timeframe")]
    pub daily_timeframe: Timeframe,
}

fn default_lookbacks() -> Vec<u32> {
    DEFAULT_LOOKBACK_YEARS.to_vec()
}

fn default_workers() -> usize {
    8
}

fn default_chunk_size() -> usize {
    1
}

fn default_intraday_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_daily_timeframe() -> Timeframe {
    Timeframe::D1
}

impl BatchConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn assets(&self) -> Vec<(String, String)> {
        self.asset_groups
            .iter()
            .flat_map(|(group, symbols)| {
                symbols.iter().map(move |s| (group.clone(), s.clone()))
            })
            .collect()
    }
}

// ============================================================
// CANCELLATION AND SUMMARY
// ============================================================

/// Cooperative cancellation flag, checked between jobs and before each
/// flush. Cancelling abandons buffered (uncommitted) results.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-run job accounting. `committed` rows reached the store,
/// `skipped` jobs produced no trades (or had no usable history),
/// `failed` jobs hit an error that was contained and logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub committed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RunSummary {
    fn merge(mut self, other: RunSummary) -> RunSummary {
        self.committed += other.committed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self
    }
}

// ============================================================
// ORCHESTRATOR
// ============================================================

/// Run the full batch: every configured symbol against every generated
/// definition and every lookback horizon.
pub fn run_batch<O: StoreOpener>(
    config: &BatchConfig,
    opener: &O,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let assets = config.assets();
    let intraday = intraday_definitions();
    let calendar: Vec<PatternDefinition> = monthly_definitions()
        .into_iter()
        .chain(annual_definitions())
        .collect();
    let jobs_per_asset =
        ((intraday.len() + calendar.len()) * config.lookback_years.len()) as u64;

    info!(
        assets = assets.len(),
        definitions = intraday.len() + calendar.len(),
        lookbacks = config.lookback_years.len(),
        workers = config.workers,
        "starting pattern batch"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| SeasonError::Computation(format!("worker pool: {e}")))?;

    let loader = HistoryLoader::new(&config.history_root);
    let chunk_size = config.chunk_size.max(1);

    let summary = pool.install(|| {
        assets
            .par_chunks(chunk_size)
            .map(|chunk| {
                if cancel.is_cancelled() {
                    return RunSummary::default();
                }
                let mut store = match opener.open() {
                    Ok(store) => store,
                    Err(err) => {
                        error!(%err, "store connection failed; chunk dropped");
                        return RunSummary {
                            failed: jobs_per_asset * chunk.len() as u64,
                            ..RunSummary::default()
                        };
                    }
                };
                chunk
                    .iter()
                    .map(|(group, symbol)| {
                        process_asset(config, &loader, &mut store, cancel, group, symbol, &intraday, &calendar)
                    })
                    .fold(RunSummary::default(), RunSummary::merge)
            })
            .reduce(RunSummary::default, RunSummary::merge)
    });

    info!(
        committed = summary.committed,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = cancel.is_cancelled(),
        "pattern batch finished"
    );
    Ok(summary)
}

/// All jobs for one symbol. History is loaded once per family timeframe
/// and shared across every definition and lookback.
#[allow(clippy::too_many_arguments)]
fn process_asset<S: PatternStore>(
    config: &BatchConfig,
    loader: &HistoryLoader,
    store: &mut S,
    cancel: &CancelToken,
    group: &str,
    symbol: &str,
    intraday: &[PatternDefinition],
    calendar: &[PatternDefinition],
) -> RunSummary {
    let mut summary = RunSummary::default();

    let asset_id = match store.ensure_asset(symbol, group) {
        Ok(id) => id,
        Err(err) => {
            error!(group, symbol, %err, "asset registration failed; symbol dropped");
            summary.failed +=
                ((intraday.len() + calendar.len()) * config.lookback_years.len()) as u64;
            return summary;
        }
    };

    for (timeframe, defs) in [
        (config.intraday_timeframe, intraday),
        (config.daily_timeframe, calendar),
    ] {
        let series = match loader.load(group, symbol, timeframe) {
            Ok(series) => series,
            Err(err @ (SeasonError::DataUnavailable { .. } | SeasonError::EmptySeries { .. })) => {
                warn!(group, symbol, %timeframe, %err, "no usable history; family skipped");
                summary.skipped += (defs.len() * config.lookback_years.len()) as u64;
                continue;
            }
            Err(err) => {
                error!(group, symbol, %timeframe, %err, "history load failed; family dropped");
                summary.failed += (defs.len() * config.lookback_years.len()) as u64;
                continue;
            }
        };

        for &lookback_years in &config.lookback_years {
            let mut buffer = Vec::new();
            for def in defs {
                if cancel.is_cancelled() {
                    return summary;
                }
                match run_job(&series, def, lookback_years) {
                    Ok(Some(result)) => buffer.push(result),
                    Ok(None) => summary.skipped += 1,
                    Err(err) => {
                        error!(
                            group, symbol, %timeframe, lookback_years,
                            family = %def.family(), %err,
                            "pattern job failed"
                        );
                        summary.failed += 1;
                    }
                }
            }
            if cancel.is_cancelled() {
                return summary;
            }
            let buffered = buffer.len() as u64;
            if buffered == 0 {
                continue;
            }
            match store.write_batch(asset_id, &buffer) {
                Ok(()) => summary.committed += buffered,
                Err(err) => {
                    error!(group, symbol, lookback_years, %err, "batch flush failed");
                    summary.failed += buffered;
                }
            }
        }
    }
    summary
}

/// One (series, definition, lookback) job: extract, compute, package.
/// `None` means no trades survived, which is a skip rather than a result.
fn run_job(
    series: &PriceSeries,
    def: &PatternDefinition,
    lookback_years: u32,
) -> Result<Option<PatternResult>> {
    let trades = extract_trades(series, def, lookback_years)?;
    Ok(compute_statistics(&trades).map(|(stats, equity)| PatternResult {
        definition: *def,
        lookback_years,
        stats,
        equity,
    }))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AssetId, PatternResult};
    use std::io::Write;
    use std::sync::Mutex;

    /// In-memory store that records committed results.
    #[derive(Debug, Default)]
    struct MemoryStore {
        inner: Arc<Mutex<Vec<PatternResult>>>,
    }

    impl PatternStore for MemoryStore {
        fn ensure_asset(&mut self, _symbol: &str, _group: &str) -> Result<AssetId> {
            Ok(1)
        }

        fn write_batch(&mut self, _asset_id: AssetId, results: &[PatternResult]) -> Result<()> {
            self.inner.lock().unwrap().extend_from_slice(results);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct MemoryOpener {
        committed: Arc<Mutex<Vec<PatternResult>>>,
    }

    impl StoreOpener for MemoryOpener {
        type Store = MemoryStore;

        fn open(&self) -> Result<MemoryStore> {
            Ok(MemoryStore {
                inner: Arc::clone(&self.committed),
            })
        }
    }

    /// Store that rejects every flush for one symbol and records the
    /// rest, so flush failures can be observed from the summary.
    #[derive(Debug)]
    struct FlakyStore {
        fail_symbol: &'static str,
        current: String,
        inner: Arc<Mutex<Vec<PatternResult>>>,
    }

    impl PatternStore for FlakyStore {
        fn ensure_asset(&mut self, symbol: &str, _group: &str) -> Result<AssetId> {
            self.current = symbol.to_string();
            Ok(1)
        }

        fn write_batch(&mut self, _asset_id: AssetId, results: &[PatternResult]) -> Result<()> {
            if self.current == self.fail_symbol {
                return Err(SeasonError::Computation("write rejected".to_string()));
            }
            self.inner.lock().unwrap().extend_from_slice(results);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FlakyOpener {
        fail_symbol: &'static str,
        committed: Arc<Mutex<Vec<PatternResult>>>,
    }

    impl StoreOpener for FlakyOpener {
        type Store = FlakyStore;

        fn open(&self) -> Result<FlakyStore> {
            Ok(FlakyStore {
                fail_symbol: self.fail_symbol,
                current: String::new(),
                inner: Arc::clone(&self.committed),
            })
        }
    }

    fn write_daily_csv(root: &Path, group: &str, symbol: &str, days: u64) {
        let dir = root.join(group).join(symbol);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f =
            std::fs::File::create(dir.join(format!("{symbol}_D1.csv"))).unwrap();
        writeln!(f, "timestamp,open,high,low,close").unwrap();
        let start = chrono::NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        for i in 0..days {
            let d = start.checked_add_days(chrono::Days::new(i)).unwrap();
            let px = 100.0 * 1.0005_f64.powi(i as i32);
            writeln!(f, "{d} 00:00:00,{px},{px},{px},{px}").unwrap();
        }
    }

    fn config(root: &Path, symbols: Vec<String>) -> BatchConfig {
        BatchConfig {
            history_root: root.to_path_buf(),
            asset_groups: BTreeMap::from([("test".to_string(), symbols)]),
            lookback_years: vec![5],
            workers: 2,
            chunk_size: 1,
            intraday_timeframe: Timeframe::H1,
            daily_timeframe: Timeframe::D1,
        }
    }

    #[test]
    fn test_missing_intraday_history_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write_daily_csv(tmp.path(), "test", "AAA", 365 * 3);

        let opener = MemoryOpener::default();
        let summary =
            run_batch(&config(tmp.path(), vec!["AAA".to_string()]), &opener, &CancelToken::new())
                .unwrap();

        // the whole intraday family is skipped: 129 defs x 1 lookback
        assert!(summary.skipped >= intraday_definitions().len() as u64);
        assert!(summary.committed > 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            summary.committed,
            opener.committed.lock().unwrap().len() as u64
        );
    }

    #[test]
    fn test_missing_symbol_entirely_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::default();
        let summary =
            run_batch(&config(tmp.path(), vec!["GHOST".to_string()]), &opener, &CancelToken::new())
                .unwrap();

        let total = (intraday_definitions().len()
            + monthly_definitions().len()
            + annual_definitions().len()) as u64;
        assert_eq!(summary.skipped, total);
        assert_eq!(summary.committed, 0);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn test_flush_failure_is_counted_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write_daily_csv(tmp.path(), "test", "AAA", 365 * 3);
        write_daily_csv(tmp.path(), "test", "BBB", 365 * 3);

        let baseline = MemoryOpener::default();
        let one = run_batch(
            &config(tmp.path(), vec!["AAA".to_string()]),
            &baseline,
            &CancelToken::new(),
        )
        .unwrap();

        let flaky = FlakyOpener {
            fail_symbol: "BBB",
            committed: Arc::default(),
        };
        let summary = run_batch(
            &config(tmp.path(), vec!["AAA".to_string(), "BBB".to_string()]),
            &flaky,
            &CancelToken::new(),
        )
        .unwrap();

        // identical histories: AAA commits exactly what the baseline
        // did, BBB's whole rejected buffer lands in failed
        assert_eq!(summary.committed, one.committed);
        assert_eq!(summary.failed, one.committed);
        assert_eq!(
            summary.committed,
            flaky.committed.lock().unwrap().len() as u64
        );
    }

    #[test]
    fn test_job_errors_counted_per_definition() {
        let tmp = tempfile::tempdir().unwrap();
        // W1 history exists but weeks have no fixed resample grid, so
        // every intraday job against it is a contained failure
        let dir = tmp.path().join("test").join("AAA");
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("AAA_W1.csv")).unwrap();
        writeln!(f, "timestamp,open,high,low,close").unwrap();
        for i in 0..10u64 {
            let d = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .checked_add_days(chrono::Days::new(i * 7))
                .unwrap();
            writeln!(f, "{d} 00:00:00,100,101,99,100").unwrap();
        }

        let mut cfg = config(tmp.path(), vec!["AAA".to_string()]);
        cfg.intraday_timeframe = Timeframe::W1;

        let opener = MemoryOpener::default();
        let summary = run_batch(&cfg, &opener, &CancelToken::new()).unwrap();

        assert_eq!(summary.failed, intraday_definitions().len() as u64);
        // no D1 artifact: the calendar families are skipped wholesale
        assert_eq!(
            summary.skipped,
            (monthly_definitions().len() + annual_definitions().len()) as u64
        );
        assert_eq!(summary.committed, 0);
    }

    #[test]
    fn test_cancelled_run_commits_nothing_new() {
        let tmp = tempfile::tempdir().unwrap();
        write_daily_csv(tmp.path(), "test", "AAA", 365 * 3);

        let opener = MemoryOpener::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let summary =
            run_batch(&config(tmp.path(), vec!["AAA".to_string()]), &opener, &cancel).unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(opener.committed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_multiple_assets_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        write_daily_csv(tmp.path(), "test", "AAA", 365 * 3);
        write_daily_csv(tmp.path(), "test", "BBB", 365 * 3);

        let opener = MemoryOpener::default();
        let one = run_batch(&config(tmp.path(), vec!["AAA".to_string()]), &opener, &CancelToken::new())
            .unwrap();
        let opener2 = MemoryOpener::default();
        let two = run_batch(
            &config(tmp.path(), vec!["AAA".to_string(), "BBB".to_string()]),
            &opener2,
            &CancelToken::new(),
        )
        .unwrap();
        // identical synthetic histories: exactly double the work
        assert_eq!(two.committed, 2 * one.committed);
        assert_eq!(two.skipped, 2 * one.skipped);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let raw = r#"{
            "history_root": "/data/history",
            "asset_groups": {"forex": ["EURUSD"]}
        }"#;
        let cfg: BatchConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.lookback_years, DEFAULT_LOOKBACK_YEARS.to_vec());
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.chunk_size, 1);
        assert_eq!(cfg.intraday_timeframe, Timeframe::H1);
        assert_eq!(cfg.daily_timeframe, Timeframe::D1);
    }
}
