//! Ingestion Service
//!
//! Keeps each (symbol, timeframe) series current: resolves the next fetch
//! window from the last stored candle, fetches it once, re-fetches in-stream
//! gaps, and writes the merged batch.

use crate::db::CandleStore;
use crate::error::{ErrorResponse, Result};
use crate::providers::{self, CandleData};
use crate::state::AppState;
use crate::timeframe::{self, Timeframe};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of one incremental ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IngestOutcome {
    /// Aligned window was empty
    UpToDate,
    /// Source returned nothing for the window
    Empty,
    Ingested {
        fetched: usize,
        gaps: usize,
        gaps_unresolved: usize,
        inserted: usize,
    },
}

/// Per-symbol results of an ingestion pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<ErrorResponse>,
}

impl IngestionReport {
    pub fn has_errors(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Ingestion service for business logic
pub struct IngestionService;

impl IngestionService {
    /// First-run lookback when nothing is stored yet
    pub fn default_lookback(timeframe: Timeframe) -> Duration {
        match timeframe {
            Timeframe::Daily => Duration::days(365 * 10),
            Timeframe::FifteenMinute => Duration::days(7),
            Timeframe::FiveMinute => Duration::days(3),
            Timeframe::OneMinute => Duration::days(1),
            // Not ingested by any scheduled job; sized like 15M
            Timeframe::TenMinute => Duration::days(7),
        }
    }

    /// Latest instant the provider is trusted not to revise
    pub fn safe_end(timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
        if timeframe.is_daily() {
            return now - Duration::days(3);
        }
        // Three candles of buffer, at least five minutes
        let buffer = (timeframe.step() * 3).max(Duration::minutes(5));
        now - buffer
    }

    pub fn resolve_start(
        state: &AppState,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        Ok(match state.duckdb.last_timestamp(symbol, timeframe)? {
            Some(last) => last + timeframe.step(),
            None => now - Self::default_lookback(timeframe),
        })
    }

    /// Missing sub-ranges between consecutive candles.
    ///
    /// A pair further apart than 1.5 steps yields `(prev + step, curr - step)`,
    /// both ends inclusive.
    pub fn detect_gaps(
        candles: &[CandleData],
        timeframe: Timeframe,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        if timeframe.is_daily() {
            return vec![];
        }
        let step = timeframe.step();
        let threshold = step * 3 / 2;

        let mut stamps: Vec<DateTime<Utc>> = candles.iter().map(|c| c.timestamp).collect();
        stamps.sort();

        stamps
            .windows(2)
            .filter(|pair| pair[1] - pair[0] > threshold)
            .map(|pair| (pair[0] + step, pair[1] - step))
            .collect()
    }

    /// Incremental fetch-and-write for one series
    pub async fn ingest_symbol(
        state: &AppState,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let start = timeframe::align_down(Self::resolve_start(state, symbol, timeframe, now)?, timeframe);
        let end = timeframe::align_down(Self::safe_end(timeframe, now), timeframe);

        if start >= end {
            info!("{} | {} | no new candles", symbol, timeframe);
            return Ok(IngestOutcome::UpToDate);
        }

        let timeout = state.config.fetch_timeout();
        let mut candles =
            providers::fetch_with_timeout(state.source.as_ref(), symbol, timeframe, start, end, timeout)
                .await?;

        if candles.is_empty() {
            info!("{} | {} | fetch returned empty", symbol, timeframe);
            return Ok(IngestOutcome::Empty);
        }
        let fetched = candles.len();

        let gaps = Self::detect_gaps(&candles, timeframe);
        let mut gaps_unresolved = 0;
        for (gap_start, gap_end) in &gaps {
            warn!("GAP {} {}: {} -> {}", symbol, timeframe, gap_start, gap_end);
            let refetch = providers::fetch_with_timeout(
                state.source.as_ref(),
                symbol,
                timeframe,
                *gap_start,
                *gap_end + timeframe.step(),
                timeout,
            )
            .await;

            match refetch {
                Ok(found) if !found.is_empty() => candles.extend(found),
                Ok(_) => gaps_unresolved += 1,
                Err(e) => {
                    warn!("Gap re-fetch failed for {} {}: {}", symbol, timeframe, e);
                    gaps_unresolved += 1;
                }
            }
        }

        let merged = providers::dedup_sorted(candles);
        let inserted = state.duckdb.write_batch(symbol, timeframe, &merged)?;

        info!(
            "{} | {} | fetched {} candles, inserted {} ({} gaps, {} unresolved)",
            symbol,
            timeframe,
            fetched,
            inserted,
            gaps.len(),
            gaps_unresolved
        );

        Ok(IngestOutcome::Ingested {
            fetched,
            gaps: gaps.len(),
            gaps_unresolved,
            inserted,
        })
    }

    /// One-shot fetch-and-write of an explicit window, no gap handling
    pub async fn backfill_range(
        state: &AppState,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        info!(
            "Backfill start | {} | {} | {} -> {} | {}",
            symbol,
            timeframe,
            start,
            end,
            state.source.id()
        );

        let start = timeframe::align_down(start, timeframe);
        if start >= end {
            warn!("Backfill window empty for {} {}", symbol, timeframe);
            return Ok(0);
        }

        let candles = providers::fetch_with_timeout(
            state.source.as_ref(),
            symbol,
            timeframe,
            start,
            end,
            state.config.fetch_timeout(),
        )
        .await?;

        if candles.is_empty() {
            warn!("Backfill empty | {} | {}", symbol, timeframe);
            return Ok(0);
        }

        state
            .duckdb
            .write_batch(symbol, timeframe, &providers::dedup_sorted(candles))
    }

    /// Ingest every symbol; one symbol's failure never stops the others
    pub async fn run_ingestion(
        state: &AppState,
        timeframe: Timeframe,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> IngestionReport {
        let mut report = IngestionReport::default();

        for symbol in symbols {
            match Self::ingest_symbol(state, symbol, timeframe, now).await {
                Ok(_) => report.succeeded.push(symbol.clone()),
                Err(e) => {
                    if e.is_transient() {
                        warn!("FAILED {} {}: {} ({})", symbol, timeframe, e, e.code());
                    } else {
                        error!("FAILED {} {}: {} ({})", symbol, timeframe, e, e.code());
                    }
                    report.failed.push(symbol.clone());
                    report.errors.push(ErrorResponse::from(&e));
                }
            }
        }

        report
    }
}
