//! DuckDB database module for candle history

pub mod models;
mod migrations;

use crate::db::CandleStore;
use crate::error::{AppError, Result};
use crate::providers::CandleData;
use crate::timeframe::{self, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::Connection;
use models::{from_epoch, CandleRow};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

const DATE_FMT: &str = "%Y-%m-%d";

/// DuckDB database wrapper
pub struct DuckDb {
    conn: Mutex<Connection>,
}

impl DuckDb {
    /// Create new DuckDB connection
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Throwaway database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT)
        .map_err(|e| AppError::Internal(format!("bad stored trade_date '{}': {}", raw, e)))
}

fn to_instant(ts: i64) -> Result<DateTime<Utc>> {
    from_epoch(ts).ok_or_else(|| AppError::Internal(format!("bad stored ts {}", ts)))
}

impl CandleStore for DuckDb {
    fn last_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let last: Option<i64> = conn.query_row(
            "SELECT MAX(ts) FROM candles WHERE symbol = ? AND timeframe = ?",
            duckdb::params![symbol, timeframe.as_str()],
            |row| row.get(0),
        )?;
        last.map(to_instant).transpose()
    }

    fn write_batch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[CandleData],
    ) -> Result<usize> {
        let mut rows: Vec<CandleRow> = Vec::with_capacity(candles.len());
        for candle in candles {
            if !timeframe::is_aligned(candle.timestamp, timeframe) {
                tracing::warn!(
                    "Dropping off-grid {} {} candle at {}",
                    symbol,
                    timeframe,
                    candle.timestamp
                );
                continue;
            }
            rows.push(CandleRow::from(candle));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        rows.sort_by_key(|r| r.ts);
        rows.dedup_by_key(|r| r.ts);

        let (min_ts, max_ts) = (rows[0].ts, rows[rows.len() - 1].ts);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: HashSet<i64> = {
            let mut stmt = tx.prepare(
                "SELECT ts FROM candles
                 WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts <= ?",
            )?;
            let found = stmt
                .query_map(
                    duckdb::params![symbol, timeframe.as_str(), min_ts, max_ts],
                    |row| row.get::<_, i64>(0),
                )?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            found
        };

        let mut stmt = tx.prepare(
            "INSERT INTO candles (symbol, timeframe, ts, trade_date, open, high, low, close, volume)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )?;

        let mut inserted = 0;
        for row in rows.iter().filter(|r| !existing.contains(&r.ts)) {
            stmt.execute(duckdb::params![
                symbol,
                timeframe.as_str(),
                row.ts,
                row.trade_date,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume,
            ])?;
            inserted += 1;
        }

        drop(stmt);
        tx.commit()?;

        tracing::debug!(
            "Stored {} new {} {} candles ({} offered)",
            inserted,
            symbol,
            timeframe,
            candles.len()
        );
        Ok(inserted)
    }

    fn range_scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ts FROM candles
             WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts < ?
             ORDER BY ts ASC",
        )?;

        let raw = stmt
            .query_map(
                duckdb::params![symbol, timeframe.as_str(), start.timestamp(), end.timestamp()],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter().map(to_instant).collect()
    }

    fn pairs(&self) -> Result<Vec<(String, Timeframe)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT symbol, timeframe FROM candles ORDER BY symbol, timeframe",
        )?;

        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut pairs = Vec::with_capacity(raw.len());
        for (symbol, tf) in raw {
            match tf.parse::<Timeframe>() {
                Ok(timeframe) => pairs.push((symbol, timeframe)),
                Err(_) => tracing::warn!("Ignoring stored pair {} with unknown timeframe {}", symbol, tf),
            }
        }
        Ok(pairs)
    }

    fn date_bounds(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let conn = self.conn.lock();
        let bounds: (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(trade_date), MAX(trade_date) FROM candles
             WHERE symbol = ? AND timeframe = ?",
            duckdb::params![symbol, timeframe.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match bounds {
            (Some(first), Some(last)) => Ok(Some((parse_date(&first)?, parse_date(&last)?))),
            _ => Ok(None),
        }
    }

    fn candle_count(&self, symbol: &str, timeframe: Timeframe) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM candles WHERE symbol = ? AND timeframe = ?",
            duckdb::params![symbol, timeframe.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn recent_trade_dates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT trade_date FROM candles
             WHERE symbol = ? AND timeframe = ?
             ORDER BY trade_date DESC
             LIMIT {}",
            limit
        ))?;

        let raw = stmt
            .query_map(
                duckdb::params![symbol, timeframe.as_str()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.iter().map(|d| parse_date(d)).collect()
    }

    fn trade_dates_between(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT trade_date FROM candles
             WHERE symbol = ? AND timeframe = ? AND trade_date >= ? AND trade_date <= ?",
        )?;

        let raw = stmt
            .query_map(
                duckdb::params![
                    symbol,
                    timeframe.as_str(),
                    from.format(DATE_FMT).to_string(),
                    to.format(DATE_FMT).to_string()
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.iter().map(|d| parse_date(d)).collect()
    }
}
