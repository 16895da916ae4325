//! External candle sources
//!
//! A source answers half-open window requests `[start, end)` and may fail;
//! the pipeline treats every failure as transient for the current run.

pub mod replay;
pub mod zerodha;

use crate::error::{AppError, Result};
use crate::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use replay::ReplaySource;
pub use zerodha::ZerodhaCandleSource;

/// One OHLCV bar as delivered by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleData {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Source of historical candles
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Source ID (e.g., "zerodha")
    fn id(&self) -> &'static str;

    /// Establish or verify the upstream session
    async fn login(&self) -> Result<()> {
        Ok(())
    }

    /// Candles with `start <= timestamp < end`, in any order
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CandleData>>;
}

/// Fetch bounded by `timeout`; an elapsed timeout becomes `AppError::Timeout`
pub async fn fetch_with_timeout(
    source: &dyn CandleSource,
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeout: Duration,
) -> Result<Vec<CandleData>> {
    match tokio::time::timeout(timeout, source.fetch_candles(symbol, timeframe, start, end)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(timeout.as_secs())),
    }
}

/// Sort ascending and keep the first candle per timestamp
pub fn dedup_sorted(mut candles: Vec<CandleData>) -> Vec<CandleData> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}
