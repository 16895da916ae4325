//! Backfill Service
//!
//! Bounded, throttled repair of data the completeness checks found missing.
//! A single call never attempts more than the configured per-run limits.

use crate::db::sqlite::models::{IntradayBackfillDetails, ReportStatus};
use crate::db::CandleStore;
use crate::error::Result;
use crate::providers;
use crate::state::AppState;
use crate::timeframe::{self, Timeframe};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Result of a daily backfill call
#[derive(Debug, Clone, Serialize)]
pub struct DailyBackfillResult {
    /// Days attempted this run, earliest first
    pub attempted: Vec<NaiveDate>,
    pub missing_count: usize,
    pub status: ReportStatus,
}

impl DailyBackfillResult {
    pub fn remaining(&self) -> usize {
        self.missing_count - self.attempted.len()
    }
}

/// Result of an intraday backfill call
#[derive(Debug, Clone, Serialize)]
pub struct IntradayBackfillResult {
    pub status: ReportStatus,
    pub details: IntradayBackfillDetails,
}

impl IntradayBackfillResult {
    fn skipped(reason: &str, skipped: usize) -> Self {
        Self {
            status: ReportStatus::Skipped,
            details: IntradayBackfillDetails {
                skipped,
                reason: Some(reason.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Backfill service for business logic
pub struct BackfillService;

impl BackfillService {
    /// Trading days in `[from, to]` with no stored daily candle
    pub fn missing_trading_days(
        state: &AppState,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let existing = state
            .duckdb
            .trade_dates_between(symbol, Timeframe::Daily, from, to)?;
        Ok(state
            .calendar
            .trading_days_between(state.exchange(), from, to)?
            .into_iter()
            .filter(|d| !existing.contains(d))
            .collect())
    }

    /// Heal up to `max_days_per_run` missing days, earliest first.
    ///
    /// A day whose fetch fails is logged and still counts as attempted.
    pub async fn backfill_daily(
        state: &AppState,
        symbol: &str,
        missing_days: &[NaiveDate],
    ) -> DailyBackfillResult {
        let mut days = missing_days.to_vec();
        days.sort();
        days.truncate(state.config.backfill.max_days_per_run);

        for day in &days {
            // Daily bars are labelled at local midnight
            let window = timeframe::session_bound(*day, NaiveTime::MIN)
                .map(|start| (start, start + Duration::days(1)));

            let healed = match window {
                Ok((start, end)) => {
                    crate::services::IngestionService::backfill_range(
                        state,
                        symbol,
                        Timeframe::Daily,
                        start,
                        end,
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match healed {
                Ok(n) => info!("Daily backfill {} {}: {} candle(s)", symbol, day, n),
                Err(e) => warn!("Daily backfill {} {} failed: {}", symbol, day, e),
            }
        }

        let status = if days.len() == missing_days.len() {
            ReportStatus::Complete
        } else {
            ReportStatus::Partial
        };

        DailyBackfillResult {
            attempted: days,
            missing_count: missing_days.len(),
            status,
        }
    }

    /// Re-fetch individual missing intraday candles.
    ///
    /// Only candles within the lookback window on trading days are tried,
    /// capped per run, one paced request per candle.
    pub async fn backfill_intraday(
        state: &AppState,
        symbol: &str,
        timeframe: &str,
        missing: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> IntradayBackfillResult {
        let timeframe = match timeframe.parse::<Timeframe>() {
            Ok(tf) if !tf.is_daily() => tf,
            _ => return IntradayBackfillResult::skipped("unsupported timeframe", 0),
        };

        if missing.is_empty() {
            return IntradayBackfillResult {
                status: ReportStatus::Noop,
                details: IntradayBackfillDetails::default(),
            };
        }

        let limits = &state.config.backfill;
        let cutoff = timeframe::trade_date(now) - Duration::days(limits.max_lookback_days);

        let mut recent: Vec<DateTime<Utc>> = Vec::new();
        for ts in missing {
            let day = timeframe::trade_date(*ts);
            if day < cutoff {
                continue;
            }
            match state.calendar.is_trading_day(state.exchange(), day) {
                Ok(true) => recent.push(*ts),
                Ok(false) => {}
                Err(e) => warn!("Calendar lookup failed for {}: {}", day, e),
            }
        }
        recent.sort();

        if recent.is_empty() {
            return IntradayBackfillResult::skipped("too_old", missing.len());
        }

        recent.truncate(limits.max_candles_per_run);
        let skipped = missing.len() - recent.len();

        info!(
            "Intraday backfill | {} {} | {} candles",
            symbol,
            timeframe,
            recent.len()
        );

        if let Err(e) = state.source.login().await {
            // Every fetch would fail the same way
            warn!("{} login failed before intraday backfill: {}", state.source.id(), e);
        }

        let timeout = state.config.fetch_timeout();
        let mut attempted = 0;
        let mut inserted = 0;

        for ts in &recent {
            attempted += 1;
            state.backfill_pacer.wait().await;

            let fetched = providers::fetch_with_timeout(
                state.source.as_ref(),
                symbol,
                timeframe,
                *ts,
                *ts + timeframe.step(),
                timeout,
            )
            .await;

            match fetched {
                Ok(candles) if !candles.is_empty() => {
                    match state.duckdb.write_batch(symbol, timeframe, &candles) {
                        Ok(n) => inserted += n,
                        Err(e) => warn!("Write failed for {} {} {}: {}", symbol, timeframe, ts, e),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Fetch failed for {} {} {}: {}", symbol, timeframe, ts, e),
            }
        }

        let status = if inserted > 0 {
            ReportStatus::Complete
        } else {
            ReportStatus::Partial
        };

        IntradayBackfillResult {
            status,
            details: IntradayBackfillDetails {
                trade_date: None,
                attempted,
                inserted,
                skipped,
                reason: None,
            },
        }
    }
}
