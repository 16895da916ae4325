//! Persistence layer
//!
//! Candles live in DuckDB (columnar, range-scan friendly). Holidays and the
//! quality-report log live in SQLite.

pub mod duckdb;
pub mod sqlite;

use crate::error::Result;
use crate::providers::CandleData;
use crate::timeframe::Timeframe;
use sqlite::models::{CheckType, LatestStatus, NewReport, QualityReport, ReportStatus};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

/// Idempotent candle persistence surface
pub trait CandleStore: Send + Sync {
    /// Most recent stored candle timestamp for the pair
    fn last_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>>;

    /// Insert candles, ignoring rows whose natural key already exists.
    /// Returns the number of newly stored rows.
    fn write_batch(&self, symbol: &str, timeframe: Timeframe, candles: &[CandleData])
        -> Result<usize>;

    /// Stored timestamps in `[start, end)`, ascending
    fn range_scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Every (symbol, timeframe) pair with at least one stored candle
    fn pairs(&self) -> Result<Vec<(String, Timeframe)>>;

    /// First and last stored trade dates
    fn date_bounds(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate)>>;

    fn candle_count(&self, symbol: &str, timeframe: Timeframe) -> Result<usize>;

    /// Distinct stored trade dates, newest first
    fn recent_trade_dates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<NaiveDate>>;

    /// Distinct stored trade dates within `[from, to]`
    fn trade_dates_between(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>>;
}

/// Append-only report log with a lifecycle for alert-class rows
pub trait ReportLog: Send + Sync {
    fn append(&self, report: &NewReport) -> Result<i64>;

    /// Newest first; `None` timeframe matches every timeframe of the symbol
    fn read_recent(
        &self,
        symbol: &str,
        timeframe: Option<&str>,
        check_type: CheckType,
        limit: usize,
    ) -> Result<Vec<QualityReport>>;

    /// Guarded alert transition; false when the prior status did not allow it
    fn transition(
        &self,
        alert_id: i64,
        new_status: ReportStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<bool>;

    /// Resolve all RAISED/ACKED alerts of one kind for a pair
    fn resolve_open_alerts(
        &self,
        symbol: &str,
        timeframe: &str,
        check_type: CheckType,
        actor: &str,
    ) -> Result<usize>;

    fn active_alerts(&self) -> Result<Vec<QualityReport>>;

    fn alert_history(&self, limit: usize) -> Result<Vec<QualityReport>>;

    fn latest_statuses(&self) -> Result<Vec<LatestStatus>>;
}
