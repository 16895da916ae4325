//! In-process replay source
//!
//! Serves candles from memory. This is the scripted source behind the unit
//! tests and the end-to-end scenarios in `tests/pipeline.rs`, which is why it
//! lives in the library tree. Faults can be scripted per symbol or per fetch
//! window.

use super::{CandleData, CandleSource};
use crate::error::{AppError, Result};
use crate::timeframe::{self, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Recorded fetch request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Default)]
struct ReplayInner {
    candles: HashMap<(String, Timeframe), BTreeMap<DateTime<Utc>, CandleData>>,
    outages: HashSet<String>,
    failing_windows: HashSet<(String, DateTime<Utc>)>,
    calls: Vec<FetchCall>,
    logins: usize,
}

#[derive(Default)]
pub struct ReplaySource {
    inner: Mutex<ReplayInner>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: &str, timeframe: Timeframe, candles: Vec<CandleData>) {
        let mut inner = self.inner.lock();
        let series = inner
            .candles
            .entry((symbol.to_string(), timeframe))
            .or_default();
        for candle in candles {
            series.insert(candle.timestamp, candle);
        }
    }

    /// While set, every fetch for `symbol` fails with a provider error
    pub fn set_outage(&self, symbol: &str, down: bool) {
        let mut inner = self.inner.lock();
        if down {
            inner.outages.insert(symbol.to_string());
        } else {
            inner.outages.remove(symbol);
        }
    }

    /// Fail every fetch for `symbol` whose window starts at `start`
    pub fn fail_window(&self, symbol: &str, start: DateTime<Utc>) {
        self.inner
            .lock()
            .failing_windows
            .insert((symbol.to_string(), start));
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.inner.lock().calls.clone()
    }

    pub fn login_count(&self) -> usize {
        self.inner.lock().logins
    }
}

#[async_trait]
impl CandleSource for ReplaySource {
    fn id(&self) -> &'static str {
        "replay"
    }

    async fn login(&self) -> Result<()> {
        self.inner.lock().logins += 1;
        Ok(())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CandleData>> {
        let mut inner = self.inner.lock();
        inner.calls.push(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            start,
            end,
        });

        if inner.outages.contains(symbol) {
            return Err(AppError::Provider(format!("replay outage for {}", symbol)));
        }
        if inner.failing_windows.contains(&(symbol.to_string(), start)) {
            return Err(AppError::Provider(format!(
                "replay fault for {} at {}",
                symbol, start
            )));
        }

        // Bars are labelled by their open time, so a window starting
        // mid-bar still returns the bar it falls in
        let from = timeframe::align_down(start, timeframe);
        if from >= end {
            return Ok(vec![]);
        }
        Ok(inner
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.range(from..end).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }
}
