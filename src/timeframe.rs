//! Timeframe registry and grid arithmetic
//!
//! Every stored candle sits on an exact grid boundary of its timeframe,
//! measured in the exchange's local timezone (IST for NSE). Daily candles sit
//! on local midnight.

use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local trading timezone of the exchange
pub const MARKET_TZ: Tz = chrono_tz::Asia::Kolkata;

/// Supported sampling intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1M")]
    OneMinute,
    #[serde(rename = "5M")]
    FiveMinute,
    #[serde(rename = "10M")]
    TenMinute,
    #[serde(rename = "15M")]
    FifteenMinute,
    #[serde(rename = "1D")]
    Daily,
}

impl Timeframe {
    /// Intraday timeframes that are ingested and reconciled
    pub const INGESTED_INTRADAY: [Timeframe; 3] = [
        Timeframe::FifteenMinute,
        Timeframe::FiveMinute,
        Timeframe::OneMinute,
    ];

    /// Identifier used in storage and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1M",
            Timeframe::FiveMinute => "5M",
            Timeframe::TenMinute => "10M",
            Timeframe::FifteenMinute => "15M",
            Timeframe::Daily => "1D",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 1,
            Timeframe::FiveMinute => 5,
            Timeframe::TenMinute => 10,
            Timeframe::FifteenMinute => 15,
            Timeframe::Daily => 1440,
        }
    }

    /// Grid step duration
    pub fn step(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, Timeframe::Daily)
    }

    /// Interval name used by the Kite historical API
    pub fn kite_interval(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "minute",
            Timeframe::FiveMinute => "5minute",
            Timeframe::TenMinute => "10minute",
            Timeframe::FifteenMinute => "15minute",
            Timeframe::Daily => "day",
        }
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1M" => Ok(Timeframe::OneMinute),
            "5M" => Ok(Timeframe::FiveMinute),
            "10M" => Ok(Timeframe::TenMinute),
            "15M" => Ok(Timeframe::FifteenMinute),
            "1D" => Ok(Timeframe::Daily),
            _ => Err(AppError::UnsupportedTimeframe(s.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Floor a timestamp to the most recent grid boundary in market-local time
pub fn align_down(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let local = ts.with_timezone(&MARKET_TZ);
    let secs_into_day = local.num_seconds_from_midnight() as i64;
    let nanos = (local.nanosecond() % 1_000_000_000) as i64;

    let excess = if timeframe.is_daily() {
        secs_into_day
    } else {
        secs_into_day % (timeframe.minutes() * 60)
    };

    ts - Duration::seconds(excess) - Duration::nanoseconds(nanos)
}

pub fn is_aligned(ts: DateTime<Utc>, timeframe: Timeframe) -> bool {
    align_down(ts, timeframe) == ts
}

/// Market-local calendar date of a timestamp
pub fn trade_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&MARKET_TZ).date_naive()
}

/// Market-local wall-clock time of day as a UTC instant
pub fn session_bound(date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
    MARKET_TZ
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            AppError::Validation(format!("{} {} does not exist in {}", date, time, MARKET_TZ))
        })
}

/// Iterator over grid boundaries in `[start, end)`
#[derive(Debug, Clone)]
pub struct GridIter {
    next: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
}

impl GridIter {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, timeframe: Timeframe) -> Self {
        Self {
            next: start,
            end,
            step: timeframe.step(),
        }
    }
}

impl Iterator for GridIter {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let current = self.next;
        self.next = current + self.step;
        Some(current)
    }
}

/// Expected candle timestamps for one session, stepping from open while
/// strictly before close
pub fn expected_grid(
    date: NaiveDate,
    timeframe: Timeframe,
    session_open: NaiveTime,
    session_close: NaiveTime,
) -> Result<Vec<DateTime<Utc>>> {
    let start = session_bound(date, session_open)?;
    let end = session_bound(date, session_close)?;
    Ok(GridIter::new(start, end, timeframe).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).unwrap()
    }

    fn close() -> NaiveTime {
        NaiveTime::from_hms_opt(15, 30, 0).unwrap()
    }

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        MARKET_TZ
            .with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_identifiers() {
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::FifteenMinute);
        assert_eq!("1D".parse::<Timeframe>().unwrap(), Timeframe::Daily);
        assert!(matches!(
            "2H".parse::<Timeframe>(),
            Err(AppError::UnsupportedTimeframe(_))
        ));
        assert_eq!("10M".parse::<Timeframe>().unwrap().step(), Duration::minutes(10));
        assert!("3M".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_expected_grid_cardinality() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let five = expected_grid(date, Timeframe::FiveMinute, open(), close()).unwrap();
        assert_eq!(five.len(), 75);
        assert_eq!(five[0], ist(2024, 3, 5, 9, 15, 0));
        assert_eq!(*five.last().unwrap(), ist(2024, 3, 5, 15, 25, 0));

        let fifteen = expected_grid(date, Timeframe::FifteenMinute, open(), close()).unwrap();
        assert_eq!(fifteen.len(), 25);

        let one = expected_grid(date, Timeframe::OneMinute, open(), close()).unwrap();
        assert_eq!(one.len(), 375);
    }

    #[test]
    fn test_grid_points_are_aligned() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        for tf in [
            Timeframe::OneMinute,
            Timeframe::FiveMinute,
            Timeframe::TenMinute,
            Timeframe::FifteenMinute,
        ] {
            for ts in expected_grid(date, tf, open(), close()).unwrap() {
                assert_eq!(align_down(ts, tf), ts, "{} not aligned for {}", ts, tf);
            }
        }
    }

    #[test]
    fn test_align_down_intraday() {
        let ts = ist(2024, 3, 5, 9, 17, 42) + Duration::milliseconds(250);
        assert_eq!(align_down(ts, Timeframe::FiveMinute), ist(2024, 3, 5, 9, 15, 0));
        assert_eq!(align_down(ts, Timeframe::FifteenMinute), ist(2024, 3, 5, 9, 15, 0));
        assert_eq!(align_down(ts, Timeframe::OneMinute), ist(2024, 3, 5, 9, 17, 0));
        assert_eq!(align_down(ts, Timeframe::TenMinute), ist(2024, 3, 5, 9, 10, 0));
    }

    #[test]
    fn test_align_down_daily_is_local_midnight() {
        let ts = ist(2024, 3, 5, 2, 0, 0);
        let aligned = align_down(ts, Timeframe::Daily);
        assert_eq!(aligned, ist(2024, 3, 5, 0, 0, 0));
        // Local midnight is the previous UTC day
        assert_eq!(aligned.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(trade_date(aligned), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_grid_iter_is_restartable() {
        let start = ist(2024, 3, 5, 9, 15, 0);
        let end = ist(2024, 3, 5, 10, 15, 0);
        let iter = GridIter::new(start, end, Timeframe::FifteenMinute);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }
}
