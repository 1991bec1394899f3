//! Persistence gateway: SQLite-backed storage for pattern definitions,
//! their statistics records, and equity curves.
//!
//! Each worker opens its own connection through a [`StoreOpener`];
//! connections run in WAL mode with a busy timeout so parallel writers
//! serialize on short transactions instead of failing. A pattern row is
//! keyed by (asset, family, params, lookback) and upserted, so re-running
//! a batch refreshes records in place instead of duplicating them.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::metrics::{EquityCurve, EquityPoint, PerformanceStatistics};
use crate::patterns::PatternDefinition;
use crate::Result;

pub type AssetId = i64;
pub type PatternId = i64;

/// Provenance tag written with every pattern row.
pub const PATTERN_SOURCE: &str = "precomputed";

/// One fully-computed pattern record, ready to persist.
#[derive(Debug, Clone)]
pub struct PatternResult {
    pub definition: PatternDefinition,
    pub lookback_years: u32,
    pub stats: PerformanceStatistics,
    pub equity: EquityCurve,
}

// ============================================================
// TRAITS
// ============================================================

/// Write-side of the gateway. One store instance belongs to one worker.
pub trait PatternStore {
    /// Resolve (creating if needed) the asset row for a symbol.
    fn ensure_asset(&mut self, symbol: &str, group: &str) -> Result<AssetId>;

    /// Atomically persist a batch of results for one asset: upsert each
    /// pattern row and replace its statistics and equity points.
    fn write_batch(&mut self, asset_id: AssetId, results: &[PatternResult]) -> Result<()>;
}

/// Factory handed to the batch orchestrator; each worker calls `open`
/// once to get its own store.
pub trait StoreOpener: Send + Sync {
    type Store: PatternStore;

    fn open(&self) -> Result<Self::Store>;
}

// ============================================================
// SQLITE
// ============================================================

/// Opens per-worker [`SqliteStore`] connections against one database
/// file.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    path: PathBuf,
}

impl SqliteGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreOpener for SqliteGateway {
    type Store = SqliteStore;

    fn open(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.path)
    }
}

/// One SQLite connection plus the schema it guarantees.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 30_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS assets (
                 id          INTEGER PRIMARY KEY,
                 symbol      TEXT NOT NULL UNIQUE,
                 asset_group TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS patterns (
                 id             INTEGER PRIMARY KEY,
                 asset_id       INTEGER NOT NULL REFERENCES assets(id),
                 family         TEXT NOT NULL,
                 params         TEXT NOT NULL,
                 lookback_years INTEGER NOT NULL,
                 source         TEXT NOT NULL,
                 UNIQUE (asset_id, family, params, lookback_years)
             );
             CREATE TABLE IF NOT EXISTS statistics (
                 pattern_id            INTEGER PRIMARY KEY REFERENCES patterns(id),
                 gross_profit_pct      REAL NOT NULL,
                 gross_loss_pct        REAL NOT NULL,
                 net_return_pct        REAL NOT NULL,
                 win_rate              REAL NOT NULL,
                 profit_factor         REAL,
                 expectancy            REAL NOT NULL,
                 sharpe_ratio          REAL,
                 sortino_ratio         REAL,
                 annual_volatility_pct REAL NOT NULL,
                 num_trades            INTEGER NOT NULL,
                 avg_trade_pct         REAL NOT NULL,
                 max_consec_wins       INTEGER NOT NULL,
                 max_consec_losses     INTEGER NOT NULL,
                 max_drawdown_pct      REAL NOT NULL,
                 drawdown_start        TEXT NOT NULL,
                 drawdown_end          TEXT NOT NULL,
                 recovery_days         INTEGER
             );
             CREATE TABLE IF NOT EXISTS equity_points (
                 id           INTEGER PRIMARY KEY,
                 pattern_id   INTEGER NOT NULL REFERENCES patterns(id),
                 timestamp    TEXT NOT NULL,
                 equity_value REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_equity_points_pattern
                 ON equity_points (pattern_id);",
        )?;
        Ok(())
    }

    /// Find an existing pattern row by its natural key.
    pub fn find_pattern(
        &self,
        asset_id: AssetId,
        def: &PatternDefinition,
        lookback_years: u32,
    ) -> Result<Option<PatternId>> {
        let params_text = def.params_json().to_string();
        let id = self
            .conn
            .query_row(
                "SELECT id FROM patterns
                 WHERE asset_id = ?1 AND family = ?2 AND params = ?3 AND lookback_years = ?4",
                params![asset_id, def.family().as_str(), params_text, lookback_years],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Read back a persisted statistics record.
    pub fn statistics(&self, pattern_id: PatternId) -> Result<Option<PerformanceStatistics>> {
        let stats = self
            .conn
            .query_row(
                "SELECT gross_profit_pct, gross_loss_pct, net_return_pct, win_rate,
                        profit_factor, expectancy, sharpe_ratio, sortino_ratio,
                        annual_volatility_pct, num_trades, avg_trade_pct,
                        max_consec_wins, max_consec_losses, max_drawdown_pct,
                        drawdown_start, drawdown_end, recovery_days
                 FROM statistics WHERE pattern_id = ?1",
                params![pattern_id],
                |row| {
                    Ok(PerformanceStatistics {
                        gross_profit_pct: row.get(0)?,
                        gross_loss_pct: row.get(1)?,
                        net_return_pct: row.get(2)?,
                        win_rate: row.get(3)?,
                        profit_factor: row.get(4)?,
                        expectancy: row.get(5)?,
                        sharpe_ratio: row.get(6)?,
                        sortino_ratio: row.get(7)?,
                        annual_volatility_pct: row.get(8)?,
                        num_trades: row.get(9)?,
                        avg_trade_pct: row.get(10)?,
                        max_consec_wins: row.get(11)?,
                        max_consec_losses: row.get(12)?,
                        max_drawdown_pct: row.get(13)?,
                        drawdown_start: row.get(14)?,
                        drawdown_end: row.get(15)?,
                        recovery_days: row.get(16)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    /// Read back a persisted equity curve, sorted by timestamp.
    pub fn equity_curve(&self, pattern_id: PatternId) -> Result<EquityCurve> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, equity_value FROM equity_points
             WHERE pattern_id = ?1 ORDER BY timestamp",
        )?;
        let points = stmt
            .query_map(params![pattern_id], |row| {
                Ok(EquityPoint {
                    timestamp: row.get(0)?,
                    equity: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(EquityCurve::from_points(points))
    }
}

impl PatternStore for SqliteStore {
    fn ensure_asset(&mut self, symbol: &str, group: &str) -> Result<AssetId> {
        let id = self.conn.query_row(
            "INSERT INTO assets (symbol, asset_group) VALUES (?1, ?2)
             ON CONFLICT (symbol) DO UPDATE SET asset_group = excluded.asset_group
             RETURNING id",
            params![symbol, group],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn write_batch(&mut self, asset_id: AssetId, results: &[PatternResult]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO patterns (asset_id, family, params, lookback_years, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (asset_id, family, params, lookback_years)
                     DO UPDATE SET source = excluded.source
                 RETURNING id",
            )?;
            let mut wipe_stats =
                tx.prepare_cached("DELETE FROM statistics WHERE pattern_id = ?1")?;
            let mut wipe_equity =
                tx.prepare_cached("DELETE FROM equity_points WHERE pattern_id = ?1")?;
            let mut insert_stats = tx.prepare_cached(
                "INSERT INTO statistics (
                     pattern_id, gross_profit_pct, gross_loss_pct, net_return_pct,
                     win_rate, profit_factor, expectancy, sharpe_ratio, sortino_ratio,
                     annual_volatility_pct, num_trades, avg_trade_pct,
                     max_consec_wins, max_consec_losses, max_drawdown_pct,
                     drawdown_start, drawdown_end, recovery_days
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                           ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            let mut insert_point = tx.prepare_cached(
                "INSERT INTO equity_points (pattern_id, timestamp, equity_value)
                 VALUES (?1, ?2, ?3)",
            )?;

            for result in results {
                let pattern_id: PatternId = upsert.query_row(
                    params![
                        asset_id,
                        result.definition.family().as_str(),
                        result.definition.params_json().to_string(),
                        result.lookback_years,
                        PATTERN_SOURCE,
                    ],
                    |row| row.get(0),
                )?;
                wipe_stats.execute(params![pattern_id])?;
                wipe_equity.execute(params![pattern_id])?;

                let s = &result.stats;
                insert_stats.execute(params![
                    pattern_id,
                    s.gross_profit_pct,
                    s.gross_loss_pct,
                    s.net_return_pct,
                    s.win_rate,
                    s.profit_factor,
                    s.expectancy,
                    s.sharpe_ratio,
                    s.sortino_ratio,
                    s.annual_volatility_pct,
                    s.num_trades,
                    s.avg_trade_pct,
                    s.max_consec_wins,
                    s.max_consec_losses,
                    s.max_drawdown_pct,
                    s.drawdown_start,
                    s.drawdown_end,
                    s.recovery_days,
                ])?;
                for point in result.equity.points() {
                    insert_point.execute(params![pattern_id, point.timestamp, point.equity])?;
                }
            }
        }
        tx.commit()?;
        debug!(asset_id, count = results.len(), "pattern batch committed");
        Ok(())
    }
}

// ============================================================
// TESTS
// ============================================================
