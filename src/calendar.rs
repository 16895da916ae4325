//! Trading calendar
//!
//! Answers "was the exchange open on date D". Weekends are always closed;
//! any other date is open unless it appears in `market_holidays`.

use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Trading-day oracle injected into every component that needs one
pub trait TradingCalendar: Send + Sync {
    fn is_trading_day(&self, exchange: &str, date: NaiveDate) -> Result<bool>;

    fn holidays_for_year(&self, exchange: &str, year: i32) -> Result<Vec<NaiveDate>>;

    /// Trading days in `[from, to]`, ascending
    fn trading_days_between(
        &self,
        exchange: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let mut days = Vec::new();
        let mut day = from;
        while day <= to {
            if self.is_trading_day(exchange, day)? {
                days.push(day);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(days)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// SQLite-backed calendar with a per (exchange, year) holiday cache.
///
/// The holiday table is static reference data, so a year is loaded once.
pub struct HolidayCalendar {
    db: Arc<SqliteDb>,
    cache: DashMap<(String, i32), Arc<BTreeSet<NaiveDate>>>,
}

impl HolidayCalendar {
    pub fn new(db: Arc<SqliteDb>) -> Self {
        Self {
            db,
            cache: DashMap::new(),
        }
    }

    fn holiday_set(&self, exchange: &str, year: i32) -> Result<Arc<BTreeSet<NaiveDate>>> {
        let key = (exchange.to_string(), year);
        if let Some(set) = self.cache.get(&key) {
            return Ok(Arc::clone(set.value()));
        }

        let set: Arc<BTreeSet<NaiveDate>> =
            Arc::new(self.db.get_holiday_dates(exchange, year)?.into_iter().collect());
        tracing::debug!("Loaded {} holidays for {} {}", set.len(), exchange, year);
        self.cache.insert(key, set.clone());
        Ok(set)
    }
}

impl TradingCalendar for HolidayCalendar {
    fn is_trading_day(&self, exchange: &str, date: NaiveDate) -> Result<bool> {
        if is_weekend(date) {
            return Ok(false);
        }
        Ok(!self.holiday_set(exchange, date.year())?.contains(&date))
    }

    fn holidays_for_year(&self, exchange: &str, year: i32) -> Result<Vec<NaiveDate>> {
        Ok(self.holiday_set(exchange, year)?.iter().copied().collect())
    }
}
