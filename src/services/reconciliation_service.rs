//! Reconciliation Service
//!
//! End-of-day pass: re-fetch today's full session for every ingested
//! intraday timeframe, then run a governance cycle over the result.

use crate::error::Result;
use crate::services::{CompletenessService, GovernanceSummary, IngestionService};
use crate::state::AppState;
use crate::timeframe::{self, Timeframe, MARKET_TZ};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use tracing::{error, info};

/// Market-local time before which the session is not considered settled
pub const EOD_NOT_BEFORE: (u32, u32) = (16, 0);

/// Outcome of one reconciliation call
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Market not yet closed, or not a trading day
    Skipped { reason: String },
    Completed {
        candles_written: usize,
        failures: usize,
        governance: Option<GovernanceSummary>,
    },
}

/// Reconciliation service for business logic
pub struct ReconciliationService;

impl ReconciliationService {
    pub async fn run_eod(
        state: &AppState,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        let local = now.with_timezone(&MARKET_TZ);
        let cutoff = NaiveTime::from_hms_opt(EOD_NOT_BEFORE.0, EOD_NOT_BEFORE.1, 0)
            .unwrap_or_default();

        if local.time() < cutoff {
            info!("EOD reconciliation skipped - market not fully closed");
            return Ok(ReconciliationOutcome::Skipped {
                reason: "market_not_closed".to_string(),
            });
        }

        let today = local.date_naive();
        if !state.calendar.is_trading_day(state.exchange(), today)? {
            info!("EOD reconciliation skipped - {} is not a trading day", today);
            return Ok(ReconciliationOutcome::Skipped {
                reason: "not_trading_day".to_string(),
            });
        }

        let start = timeframe::session_bound(today, state.config.session_open)?;
        let end = timeframe::session_bound(today, state.config.session_close)?;
        info!("EOD RECON START | window {} -> {}", start, end);

        let mut candles_written = 0;
        let mut failures = 0;

        for symbol in symbols {
            for tf in Timeframe::INGESTED_INTRADAY {
                match IngestionService::backfill_range(state, symbol, tf, start, end).await {
                    Ok(n) => {
                        info!("EOD FIX | {} | {} | wrote {} candles", symbol, tf, n);
                        candles_written += n;
                    }
                    Err(e) => {
                        error!("EOD FIX FAILED | {} | {} | {}", symbol, tf, e);
                        failures += 1;
                    }
                }
            }
        }
        info!("EOD RECON END");

        let governance = match CompletenessService::run(state, now).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("DATA GOVERNANCE FAILED: {}", e);
                None
            }
        };

        Ok(ReconciliationOutcome::Completed {
            candles_written,
            failures,
            governance,
        })
    }
}
