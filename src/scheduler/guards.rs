//! Run guards

use crate::calendar::{self, TradingCalendar};
use crate::timeframe::MARKET_TZ;
use chrono::{DateTime, NaiveTime, Utc};
use tracing::warn;

/// True on a trading day between session open and close, both inclusive
pub fn is_market_open(
    calendar: &dyn TradingCalendar,
    exchange: &str,
    session_open: NaiveTime,
    session_close: NaiveTime,
    now: DateTime<Utc>,
) -> bool {
    let local = now.with_timezone(&MARKET_TZ);
    let today = local.date_naive();

    if calendar::is_weekend(today) {
        return false;
    }
    match calendar.is_trading_day(exchange, today) {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            // Weekday with an unreadable calendar: fall back to the clock
            warn!("Holiday lookup failed for {}: {}", today, e);
        }
    }

    let time = local.time();
    session_open <= time && time <= session_close
}
