//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    // Run each migration
    run_migration(conn, "001_market_holidays", CREATE_MARKET_HOLIDAYS_TABLE)?;
    run_migration(conn, "002_data_quality_reports", CREATE_DATA_QUALITY_REPORTS_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_MARKET_HOLIDAYS_TABLE: &str = r#"
CREATE TABLE market_holidays (
    exchange TEXT NOT NULL,
    holiday_date TEXT NOT NULL,
    year INTEGER NOT NULL,
    description TEXT,
    PRIMARY KEY (exchange, holiday_date)
);

CREATE INDEX idx_market_holidays_year ON market_holidays(exchange, year);
"#;

const CREATE_DATA_QUALITY_REPORTS_TABLE: &str = r#"
CREATE TABLE data_quality_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_ts TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT,
    check_type TEXT NOT NULL,
    status TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_dqr_streak ON data_quality_reports(symbol, check_type, timeframe, run_ts DESC);
CREATE INDEX idx_dqr_status ON data_quality_reports(check_type, status);
"#;
