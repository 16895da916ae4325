//! Market holidays
//!
//! Static reference data, seeded out-of-band and read by the trading calendar.

use super::models::MarketHoliday;
use crate::error::{AppError, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};

const DATE_FMT: &str = "%Y-%m-%d";

/// Insert a holiday; an existing (exchange, date) row is left untouched.
/// Returns true when a new row was written.
pub fn insert_holiday(
    conn: &Connection,
    exchange: &str,
    date: NaiveDate,
    description: Option<&str>,
) -> Result<bool> {
    let rows = conn.execute(
        "INSERT INTO market_holidays (exchange, holiday_date, year, description)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (exchange, holiday_date) DO NOTHING",
        params![exchange, date.format(DATE_FMT).to_string(), date.year(), description],
    )?;

    if rows > 0 {
        tracing::info!("Added market holiday: {} {}", exchange, date);
    }
    Ok(rows > 0)
}

/// Holiday dates of one exchange and year, ascending
pub fn get_holiday_dates(conn: &Connection, exchange: &str, year: i32) -> Result<Vec<NaiveDate>> {
    get_holidays(conn, exchange, year)?
        .iter()
        .map(|h| {
            NaiveDate::parse_from_str(&h.holiday_date, DATE_FMT).map_err(|e| {
                AppError::Internal(format!("bad holiday_date '{}': {}", h.holiday_date, e))
            })
        })
        .collect()
}

/// Full holiday rows of one exchange and year
fn get_holidays(conn: &Connection, exchange: &str, year: i32) -> Result<Vec<MarketHoliday>> {
    let mut stmt = conn.prepare(
        "SELECT exchange, holiday_date, year, description
         FROM market_holidays
         WHERE exchange = ?1 AND year = ?2
         ORDER BY holiday_date",
    )?;

    let holidays = stmt
        .query_map(params![exchange, year], |row| {
            Ok(MarketHoliday {
                exchange: row.get(0)?,
                holiday_date: row.get(1)?,
                year: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(holidays)
}
