//! Completeness Service
//!
//! One governance cycle over every stored (symbol, timeframe) pair:
//!
//! - daily coverage against the trading calendar, healing with a throttled
//!   daily backfill and escalating stuck runs
//! - intraday freshness (report only)
//! - intraday completeness of the most recent sessions, healing with the
//!   intraday backfill and escalating repeated PARTIAL outcomes
//!
//! Every check outcome is appended to the report log, tagged with the
//! cycle's run id.

use crate::db::sqlite::models::{
    AutoBackfillDetails, CompletenessDetails, DailyCoverageDetails, DateRange, FreshnessDetails,
    NewReport, ReportDetails, ReportStatus,
};
use crate::db::{CandleStore, ReportLog};
use crate::error::Result;
use crate::services::{AlertService, BackfillService};
use crate::state::AppState;
use crate::timeframe::{self, Timeframe, MARKET_TZ};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Counters for one governance cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GovernanceSummary {
    pub run_id: String,
    pub pairs_checked: usize,
    pub reports_written: usize,
    pub backfills_triggered: usize,
    pub alerts_raised: usize,
    pub alerts_auto_resolved: usize,
    pub failures_isolated: usize,
}

/// Allowed lag before a series counts as stale, in minutes
pub fn freshness_threshold(timeframe: Timeframe) -> i64 {
    match timeframe {
        Timeframe::OneMinute => 5,
        Timeframe::FiveMinute => 15,
        Timeframe::FifteenMinute => 30,
        _ => 60,
    }
}

/// Expected timestamps with no stored counterpart, ascending
pub fn missing_candles(
    expected: &[DateTime<Utc>],
    actual: &[DateTime<Utc>],
) -> Vec<DateTime<Utc>> {
    let actual: BTreeSet<_> = actual.iter().collect();
    let missing: BTreeSet<_> = expected.iter().filter(|ts| !actual.contains(ts)).copied().collect();
    missing.into_iter().collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// State carried through one cycle
struct Cycle<'a> {
    state: &'a AppState,
    now: DateTime<Utc>,
    summary: GovernanceSummary,
}

impl<'a> Cycle<'a> {
    fn persist(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        status: ReportStatus,
        details: ReportDetails,
    ) -> Result<i64> {
        let id = self.state.sqlite.append(&NewReport {
            run_ts: self.now,
            symbol: symbol.to_string(),
            timeframe: Some(timeframe.as_str().to_string()),
            status,
            details,
            run_id: Some(self.summary.run_id.clone()),
        })?;
        self.summary.reports_written += 1;
        Ok(id)
    }

    fn isolate(&mut self, what: &str, symbol: &str, timeframe: Timeframe, result: Result<()>) {
        if let Err(e) = result {
            error!("{} FAILED | {} | {} | {} ({})", what, symbol, timeframe, e, e.code());
            self.summary.failures_isolated += 1;
        }
    }

    async fn check_daily_coverage(&mut self, symbol: &str) -> Result<()> {
        let state = self.state;
        let Some((first, last)) = state.duckdb.date_bounds(symbol, Timeframe::Daily)? else {
            return Ok(());
        };

        let expected = state
            .calendar
            .trading_days_between(state.exchange(), first, last)?
            .len();
        let actual = state.duckdb.candle_count(symbol, Timeframe::Daily)?;

        let status = if actual >= expected {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };
        let coverage_pct = if expected > 0 {
            round2(actual as f64 / expected as f64 * 100.0)
        } else {
            0.0
        };

        info!(
            "{} | 1D | coverage {}/{} ({}%) {}",
            symbol, actual, expected, coverage_pct, status
        );

        self.persist(
            symbol,
            Timeframe::Daily,
            status,
            ReportDetails::DailyCoverage(DailyCoverageDetails {
                expected_trading_days: expected,
                actual_days: actual,
                coverage_pct,
                range: DateRange {
                    from: first.to_string(),
                    to: last.to_string(),
                },
            }),
        )?;

        if status == ReportStatus::Fail {
            self.heal_daily(symbol, first, last).await?;
        }
        Ok(())
    }

    async fn heal_daily(&mut self, symbol: &str, first: NaiveDate, last: NaiveDate) -> Result<()> {
        let state = self.state;
        let missing = BackfillService::missing_trading_days(state, symbol, first, last)?;
        if missing.is_empty() {
            return Ok(());
        }

        let result = BackfillService::backfill_daily(state, symbol, &missing).await;
        self.summary.backfills_triggered += 1;

        self.persist(
            symbol,
            Timeframe::Daily,
            result.status,
            ReportDetails::AutoBackfill(AutoBackfillDetails {
                healed_days: result.attempted.iter().map(|d| d.to_string()).collect(),
                healed_count: result.attempted.len(),
                remaining_count: result.remaining(),
                throttle_limit: state.config.backfill.max_days_per_run,
            }),
        )?;

        if result.status == ReportStatus::Partial {
            let raised = AlertService::escalate_daily(
                state,
                symbol,
                self.now,
                Some(&self.summary.run_id),
            )?;
            if raised.is_some() {
                self.summary.alerts_raised += 1;
                self.summary.reports_written += 1;
            }
        }
        Ok(())
    }

    fn check_freshness(&mut self, symbol: &str, timeframe: Timeframe) -> Result<()> {
        let Some(last) = self.state.duckdb.last_timestamp(symbol, timeframe)? else {
            return Ok(());
        };

        let lag_minutes = ((self.now - last).num_milliseconds() as f64 / 60_000.0).max(0.0);
        let threshold = freshness_threshold(timeframe);
        let status = if lag_minutes <= threshold as f64 {
            ReportStatus::Pass
        } else {
            warn!(
                "STALE {} {} | last candle {} ({:.1} min behind)",
                symbol, timeframe, last, lag_minutes
            );
            ReportStatus::Fail
        };

        self.persist(
            symbol,
            timeframe,
            status,
            ReportDetails::Freshness(FreshnessDetails {
                last_candle_ts: last.with_timezone(&MARKET_TZ).to_rfc3339(),
                lag_minutes: round2(lag_minutes),
                threshold_minutes: threshold,
            }),
        )?;
        Ok(())
    }

    async fn check_intraday_completeness(&mut self, symbol: &str, timeframe: Timeframe) -> Result<()> {
        let state = self.state;
        let dates = state.duckdb.recent_trade_dates(
            symbol,
            timeframe,
            state.config.completeness_recent_days,
        )?;

        for date in dates {
            if !state.calendar.is_trading_day(state.exchange(), date)? {
                continue;
            }
            let result = self.check_session(symbol, timeframe, date).await;
            self.isolate("COMPLETENESS", symbol, timeframe, result);
        }
        Ok(())
    }

    async fn check_session(&mut self, symbol: &str, timeframe: Timeframe, date: NaiveDate) -> Result<()> {
        let state = self.state;
        let expected = timeframe::expected_grid(
            date,
            timeframe,
            state.config.session_open,
            state.config.session_close,
        )?;
        let (Some(first), Some(last)) = (expected.first(), expected.last()) else {
            return Ok(());
        };

        let actual = state
            .duckdb
            .range_scan(symbol, timeframe, *first, *last + timeframe.step())?;
        let missing = missing_candles(&expected, &actual);

        let status = if missing.is_empty() {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };
        info!(
            "{} | {} | {} | {}/{} candles, {} missing",
            symbol,
            timeframe,
            date,
            actual.len(),
            expected.len(),
            missing.len()
        );

        self.persist(
            symbol,
            timeframe,
            status,
            ReportDetails::IntradayCompleteness(CompletenessDetails {
                trade_date: date.to_string(),
                expected_count: expected.len(),
                actual_count: actual.len(),
                missing_count: missing.len(),
            }),
        )?;

        if missing.is_empty() {
            self.summary.alerts_auto_resolved +=
                AlertService::auto_resolve_intraday(state, symbol, timeframe.as_str())?;
            return Ok(());
        }

        let mut result =
            BackfillService::backfill_intraday(state, symbol, timeframe.as_str(), &missing, self.now)
                .await;
        result.details.trade_date = Some(date.to_string());
        self.summary.backfills_triggered += 1;

        info!(
            "{} | {} | intraday backfill {} (attempted {}, inserted {}, skipped {})",
            symbol,
            timeframe,
            result.status,
            result.details.attempted,
            result.details.inserted,
            result.details.skipped
        );

        self.persist(
            symbol,
            timeframe,
            result.status,
            ReportDetails::IntradayBackfill(result.details),
        )?;

        if result.status == ReportStatus::Partial {
            let raised = AlertService::escalate_intraday(
                state,
                symbol,
                timeframe.as_str(),
                date,
                self.now,
                Some(&self.summary.run_id),
            )?;
            if raised.is_some() {
                self.summary.alerts_raised += 1;
                self.summary.reports_written += 1;
            }
        }
        Ok(())
    }
}

/// Completeness service for business logic
pub struct CompletenessService;

impl CompletenessService {
    /// Run one governance cycle over every stored pair.
    ///
    /// Only a failure to list the pairs aborts the cycle; any other error is
    /// logged, counted and skipped.
    pub async fn run(state: &AppState, now: DateTime<Utc>) -> Result<GovernanceSummary> {
        let mut cycle = Cycle {
            state,
            now,
            summary: GovernanceSummary {
                run_id: Uuid::new_v4().to_string(),
                ..Default::default()
            },
        };

        let pairs = state.duckdb.pairs()?;
        info!(
            "DATA GOVERNANCE START | run {} | {} pairs",
            cycle.summary.run_id,
            pairs.len()
        );

        for (symbol, timeframe) in &pairs {
            cycle.summary.pairs_checked += 1;

            if timeframe.is_daily() {
                let result = cycle.check_daily_coverage(symbol).await;
                cycle.isolate("DAILY COVERAGE", symbol, *timeframe, result);
            } else {
                let result = cycle.check_freshness(symbol, *timeframe);
                cycle.isolate("FRESHNESS", symbol, *timeframe, result);
                let result = cycle.check_intraday_completeness(symbol, *timeframe).await;
                cycle.isolate("COMPLETENESS", symbol, *timeframe, result);
            }
        }

        let summary = cycle.summary;
        info!(
            "DATA GOVERNANCE END | run {} | {} reports, {} backfills, {} alerts raised, {} resolved, {} failures",
            summary.run_id,
            summary.reports_written,
            summary.backfills_triggered,
            summary.alerts_raised,
            summary.alerts_auto_resolved,
            summary.failures_isolated
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::db::sqlite::models::CheckType;
    use crate::providers::{CandleData, ReplaySource};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn ist(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        MARKET_TZ
            .with_ymd_and_hms(2024, 3, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bar(ts: DateTime<Utc>) -> CandleData {
        CandleData {
            timestamp: ts,
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 500,
        }
    }

    fn session(d: u32, tf: Timeframe) -> Vec<CandleData> {
        timeframe::expected_grid(
            NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
            tf,
            chrono::NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        )
        .unwrap()
        .into_iter()
        .map(bar)
        .collect()
    }

    fn quiet_state(source: Arc<ReplaySource>) -> AppState {
        let mut config = PipelineConfig::default();
        config.backfill.api_sleep_secs = 0.0;
        AppState::in_memory(config, source).unwrap()
    }

    #[test]
    fn test_freshness_thresholds() {
        assert_eq!(freshness_threshold(Timeframe::OneMinute), 5);
        assert_eq!(freshness_threshold(Timeframe::FiveMinute), 15);
        assert_eq!(freshness_threshold(Timeframe::FifteenMinute), 30);
        assert_eq!(freshness_threshold(Timeframe::TenMinute), 60);
    }

    #[test]
    fn test_missing_is_set_difference() {
        let expected = vec![ist(5, 9, 15), ist(5, 9, 30), ist(5, 9, 45)];
        let actual = vec![ist(5, 9, 30), ist(5, 10, 0)];
        assert_eq!(
            missing_candles(&expected, &actual),
            vec![ist(5, 9, 15), ist(5, 9, 45)]
        );
    }

    #[tokio::test]
    async fn test_empty_store_is_a_noop() {
        let state = quiet_state(Arc::new(ReplaySource::new()));
        let summary = CompletenessService::run(&state, ist(5, 16, 0)).await.unwrap();
        assert_eq!(summary.pairs_checked, 0);
        assert_eq!(summary.reports_written, 0);
        assert!(!summary.run_id.is_empty());
    }

    #[tokio::test]
    async fn test_complete_session_passes_and_tags_run_id() {
        let state = quiet_state(Arc::new(ReplaySource::new()));
        state
            .duckdb
            .write_batch("INFY", Timeframe::FifteenMinute, &session(5, Timeframe::FifteenMinute))
            .unwrap();

        let summary = CompletenessService::run(&state, ist(5, 15, 30)).await.unwrap();
        assert_eq!(summary.pairs_checked, 1);
        assert_eq!(summary.reports_written, 2);
        assert_eq!(summary.backfills_triggered, 0);

        let freshness = state
            .sqlite
            .read_recent("INFY", Some("15M"), CheckType::Freshness, 1)
            .unwrap();
        assert_eq!(freshness[0].status, ReportStatus::Pass);
        assert_eq!(freshness[0].details["lag_minutes"], 15.0);
        assert_eq!(freshness[0].details["run_id"], summary.run_id.as_str());

        let completeness = state
            .sqlite
            .read_recent("INFY", Some("15M"), CheckType::IntradayCompleteness, 1)
            .unwrap();
        assert_eq!(completeness[0].status, ReportStatus::Pass);
        assert_eq!(completeness[0].details["expected_count"], 25);
    }

    #[tokio::test]
    async fn test_stale_series_fails_freshness_without_backfill() {
        let state = quiet_state(Arc::new(ReplaySource::new()));
        state
            .duckdb
            .write_batch("INFY", Timeframe::FiveMinute, &session(5, Timeframe::FiveMinute))
            .unwrap();

        let summary = CompletenessService::run(&state, ist(6, 11, 0)).await.unwrap();
        let freshness = state
            .sqlite
            .read_recent("INFY", Some("5M"), CheckType::Freshness, 1)
            .unwrap();
        assert_eq!(freshness[0].status, ReportStatus::Fail);
        assert_eq!(freshness[0].details["threshold_minutes"], 15);
        assert_eq!(summary.backfills_triggered, 0);
    }

    #[tokio::test]
    async fn test_daily_coverage_pass_and_fail() {
        let source = Arc::new(ReplaySource::new());
        let state = quiet_state(source.clone());
        // Mon 4th .. Fri 8th with Wed 6th missing
        let stored: Vec<_> = [4, 5, 7, 8].iter().map(|d| bar(ist(*d, 0, 0))).collect();
        state.duckdb.write_batch("TCS", Timeframe::Daily, &stored).unwrap();
        source.insert("TCS", Timeframe::Daily, vec![bar(ist(6, 0, 0))]);

        let summary = CompletenessService::run(&state, ist(12, 18, 0)).await.unwrap();
        assert_eq!(summary.backfills_triggered, 1);

        let coverage = state
            .sqlite
            .read_recent("TCS", Some("1D"), CheckType::DailyCoverage, 1)
            .unwrap();
        assert_eq!(coverage[0].status, ReportStatus::Fail);
        assert_eq!(coverage[0].details["coverage_pct"], 80.0);
        assert_eq!(coverage[0].details["range"]["from"], "2024-03-04");

        let backfill = state
            .sqlite
            .read_recent("TCS", None, CheckType::AutoBackfill, 1)
            .unwrap();
        assert_eq!(backfill[0].status, ReportStatus::Complete);
        assert_eq!(backfill[0].details["healed_days"][0], "2024-03-06");
        assert_eq!(backfill[0].details["throttle_limit"], 5);

        let summary = CompletenessService::run(&state, ist(12, 18, 5)).await.unwrap();
        assert_eq!(summary.backfills_triggered, 0);
        let coverage = state
            .sqlite
            .read_recent("TCS", Some("1D"), CheckType::DailyCoverage, 1)
            .unwrap();
        assert_eq!(coverage[0].status, ReportStatus::Pass);
    }

    #[tokio::test]
    async fn test_persistent_outage_raises_intraday_alert() {
        let source = Arc::new(ReplaySource::new());
        source.set_outage("INFY", true);
        let state = quiet_state(source);

        let mut candles = session(5, Timeframe::FifteenMinute);
        candles.remove(3);
        state
            .duckdb
            .write_batch("INFY", Timeframe::FifteenMinute, &candles)
            .unwrap();

        let now = ist(5, 16, 0);
        for run in 0..3 {
            let summary = CompletenessService::run(&state, now + Duration::minutes(run))
                .await
                .unwrap();
            assert_eq!(summary.backfills_triggered, 1);
            assert_eq!(summary.alerts_raised, if run == 2 { 1 } else { 0 });
        }

        let alerts = state.sqlite.active_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].check_type, CheckType::IntradayBackfillAlert);
        assert_eq!(alerts[0].details["trade_date"], "2024-03-05");
    }
}
