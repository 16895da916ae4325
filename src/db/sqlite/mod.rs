//! SQLite database module

pub mod models;
mod market;
mod migrations;
mod quality_reports;

use crate::db::ReportLog;
use crate::error::Result;
use chrono::{NaiveDate, Utc};
use models::*;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

/// SQLite database wrapper
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Create new SQLite database connection
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

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

    // ========== Market Holiday Methods ==========

    pub fn insert_holiday(
        &self,
        exchange: &str,
        date: NaiveDate,
        description: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        market::insert_holiday(&conn, exchange, date, description)
    }

    pub fn get_holiday_dates(&self, exchange: &str, year: i32) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock();
        market::get_holiday_dates(&conn, exchange, year)
    }

    // ========== Quality Report Methods ==========

    pub fn get_report(&self, id: i64) -> Result<Option<QualityReport>> {
        let conn = self.conn.lock();
        quality_reports::get_report(&conn, id)
    }
}

impl ReportLog for SqliteDb {
    fn append(&self, report: &NewReport) -> Result<i64> {
        let conn = self.conn.lock();
        quality_reports::append_report(&conn, report)
    }

    fn read_recent(
        &self,
        symbol: &str,
        timeframe: Option<&str>,
        check_type: CheckType,
        limit: usize,
    ) -> Result<Vec<QualityReport>> {
        let conn = self.conn.lock();
        quality_reports::read_recent(&conn, symbol, timeframe, check_type, limit)
    }

    fn transition(
        &self,
        alert_id: i64,
        new_status: ReportStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        quality_reports::transition_alert(&conn, alert_id, new_status, actor, note, Utc::now())
    }

    fn resolve_open_alerts(
        &self,
        symbol: &str,
        timeframe: &str,
        check_type: CheckType,
        actor: &str,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        quality_reports::resolve_open_alerts(&conn, symbol, timeframe, check_type, actor, Utc::now())
    }

    fn active_alerts(&self) -> Result<Vec<QualityReport>> {
        let conn = self.conn.lock();
        quality_reports::active_alerts(&conn)
    }

    fn alert_history(&self, limit: usize) -> Result<Vec<QualityReport>> {
        let conn = self.conn.lock();
        quality_reports::alert_history(&conn, limit)
    }

    fn latest_statuses(&self) -> Result<Vec<LatestStatus>> {
        let conn = self.conn.lock();
        quality_reports::latest_statuses(&conn)
    }
}
