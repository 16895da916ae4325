//! DuckDB data models

use crate::providers::CandleData;
use crate::timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored candle row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRow {
    pub ts: i64,
    pub trade_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl From<&CandleData> for CandleRow {
    fn from(candle: &CandleData) -> Self {
        Self {
            ts: candle.timestamp.timestamp(),
            trade_date: timeframe::trade_date(candle.timestamp)
                .format("%Y-%m-%d")
                .to_string(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }
}

/// Epoch seconds back to a UTC instant
pub fn from_epoch(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}
