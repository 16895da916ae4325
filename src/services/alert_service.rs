//! Alert Service
//!
//! Escalation of repeated PARTIAL backfill outcomes and the human-facing
//! alert lifecycle (acknowledge, resolve, health summaries).

use crate::db::sqlite::models::{
    AlertLifecycle, CheckType, DailyAlertDetails, IntradayAlertDetails, NewReport, QualityReport,
    ReportDetails, ReportStatus,
};
use crate::db::ReportLog;
use crate::error::Result;
use crate::state::AppState;
use crate::timeframe::Timeframe;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const DAILY_ALERT_MESSAGE: &str = "Auto-backfill stuck in PARTIAL state";
pub const INTRADAY_ALERT_MESSAGE: &str = "Intraday auto-backfill repeatedly failing";

/// Actor recorded when a completeness PASS closes an alert
pub const AUTO_ACTOR: &str = "auto";

/// Derived health of one symbol: latest status per check
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolHealth {
    pub symbol: String,
    pub daily_coverage: Option<ReportStatus>,
    pub auto_backfill: Option<ReportStatus>,
    /// Timeframe -> latest freshness status
    pub freshness: BTreeMap<String, ReportStatus>,
    /// Timeframe -> latest completeness status
    pub intraday_completeness: BTreeMap<String, ReportStatus>,
}

/// Alert service for business logic
pub struct AlertService;

impl AlertService {
    /// Length of the leading run of PARTIAL rows (input newest first)
    pub fn partial_streak(reports: &[QualityReport]) -> usize {
        reports
            .iter()
            .take_while(|r| r.status == ReportStatus::Partial)
            .count()
    }

    /// Raise an `auto_backfill_alert` when the daily backfill streak is
    /// strictly above the threshold.
    ///
    /// Returns the new alert id, if one was raised.
    pub fn escalate_daily(
        state: &AppState,
        symbol: &str,
        run_ts: DateTime<Utc>,
        run_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let threshold = state.config.escalation.max_partial_days;
        let recent = state
            .sqlite
            .read_recent(symbol, None, CheckType::AutoBackfill, threshold + 5)?;
        let streak = Self::partial_streak(&recent);

        if streak <= threshold {
            return Ok(None);
        }

        warn!(
            "ALERT {} | daily auto-backfill PARTIAL {} runs in a row",
            symbol, streak
        );

        let id = state.sqlite.append(&NewReport {
            run_ts,
            symbol: symbol.to_string(),
            timeframe: Some(Timeframe::Daily.as_str().to_string()),
            status: ReportStatus::Raised,
            details: ReportDetails::AutoBackfillAlert(DailyAlertDetails {
                consecutive_partial_days: streak,
                threshold,
                message: DAILY_ALERT_MESSAGE.to_string(),
                lifecycle: AlertLifecycle::default(),
            }),
            run_id: run_id.map(str::to_string),
        })?;
        Ok(Some(id))
    }

    /// Raise an `intraday_backfill_alert` once the streak for the pair
    /// reaches the threshold
    pub fn escalate_intraday(
        state: &AppState,
        symbol: &str,
        timeframe: &str,
        trade_date: NaiveDate,
        run_ts: DateTime<Utc>,
        run_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let threshold = state.config.escalation.max_intraday_partial_runs;
        let recent = state.sqlite.read_recent(
            symbol,
            Some(timeframe),
            CheckType::IntradayBackfill,
            threshold + 2,
        )?;
        let streak = Self::partial_streak(&recent);

        if streak < threshold {
            return Ok(None);
        }

        warn!(
            "ALERT {} {} | intraday backfill PARTIAL {} runs in a row ({})",
            symbol, timeframe, streak, trade_date
        );

        let id = state.sqlite.append(&NewReport {
            run_ts,
            symbol: symbol.to_string(),
            timeframe: Some(timeframe.to_string()),
            status: ReportStatus::Raised,
            details: ReportDetails::IntradayBackfillAlert(IntradayAlertDetails {
                consecutive_partial_runs: streak,
                threshold,
                trade_date: trade_date.to_string(),
                message: INTRADAY_ALERT_MESSAGE.to_string(),
                lifecycle: AlertLifecycle::default(),
            }),
            run_id: run_id.map(str::to_string),
        })?;
        Ok(Some(id))
    }

    /// RAISED -> ACKED. False when the alert is missing or not RAISED.
    pub fn acknowledge(state: &AppState, alert_id: i64, actor: &str) -> Result<bool> {
        let moved = state
            .sqlite
            .transition(alert_id, ReportStatus::Acked, actor, None)?;
        if !moved {
            info!("Alert {} not found or already in terminal state", alert_id);
        }
        Ok(moved)
    }

    /// RAISED/ACKED -> RESOLVED. False when the alert is missing or closed.
    pub fn resolve(
        state: &AppState,
        alert_id: i64,
        actor: &str,
        note: Option<&str>,
    ) -> Result<bool> {
        let moved = state
            .sqlite
            .transition(alert_id, ReportStatus::Resolved, actor, note)?;
        if !moved {
            info!("Alert {} not found or already in terminal state", alert_id);
        }
        Ok(moved)
    }

    /// Close open intraday alerts for a pair whose completeness now passes.
    ///
    /// Daily alerts are only ever closed by a human.
    pub fn auto_resolve_intraday(state: &AppState, symbol: &str, timeframe: &str) -> Result<usize> {
        let closed = state.sqlite.resolve_open_alerts(
            symbol,
            timeframe,
            CheckType::IntradayBackfillAlert,
            AUTO_ACTOR,
        )?;
        if closed > 0 {
            info!("Auto-resolved {} alert(s) for {} {}", closed, symbol, timeframe);
        }
        Ok(closed)
    }

    pub fn active_alerts(state: &AppState) -> Result<Vec<QualityReport>> {
        state.sqlite.active_alerts()
    }

    pub fn alert_history(state: &AppState, limit: usize) -> Result<Vec<QualityReport>> {
        state.sqlite.alert_history(limit)
    }

    /// Per-symbol health built from the latest status of every check
    pub fn symbol_health(state: &AppState) -> Result<Vec<SymbolHealth>> {
        let mut by_symbol: BTreeMap<String, SymbolHealth> = BTreeMap::new();

        for latest in state.sqlite.latest_statuses()? {
            let health = by_symbol
                .entry(latest.symbol.clone())
                .or_insert_with(|| SymbolHealth {
                    symbol: latest.symbol.clone(),
                    ..Default::default()
                });
            let tf = latest.timeframe.clone().unwrap_or_default();

            match latest.check_type {
                CheckType::DailyCoverage => health.daily_coverage = Some(latest.status),
                CheckType::AutoBackfill => health.auto_backfill = Some(latest.status),
                CheckType::Freshness => {
                    health.freshness.insert(tf, latest.status);
                }
                CheckType::IntradayCompleteness => {
                    health.intraday_completeness.insert(tf, latest.status);
                }
                _ => {}
            }
        }

        Ok(by_symbol.into_values().collect())
    }
}
