//! Pipeline Integration Tests
//!
//! Drive ingestion, governance, backfill and the alert lifecycle end to end
//! against in-memory stores (one test on disk) with a scripted candle source.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use historify_sentinel::config::PipelineConfig;
use historify_sentinel::db::duckdb::DuckDb;
use historify_sentinel::db::sqlite::models::{CheckType, ReportStatus};
use historify_sentinel::db::sqlite::SqliteDb;
use historify_sentinel::db::{CandleStore, ReportLog};
use historify_sentinel::providers::{CandleData, ReplaySource};
use historify_sentinel::scheduler::JobRunner;
use historify_sentinel::services::{
    AlertService, BackfillService, CompletenessService, ReconciliationOutcome,
};
use historify_sentinel::state::AppState;
use historify_sentinel::timeframe::{self, Timeframe, MARKET_TZ};

fn ist(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    MARKET_TZ
        .with_ymd_and_hms(2024, 3, d, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn candle(ts: DateTime<Utc>) -> CandleData {
    CandleData {
        timestamp: ts,
        open: 1450.0,
        high: 1462.5,
        low: 1441.0,
        close: 1458.2,
        volume: 12_000,
    }
}

fn session(d: u32, tf: Timeframe) -> Vec<CandleData> {
    timeframe::expected_grid(
        day(d),
        tf,
        NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
    )
    .unwrap()
    .into_iter()
    .map(candle)
    .collect()
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.backfill.api_sleep_secs = 0.0;
    config.job_runner.min_sleep_secs = 0.0;
    config.job_runner.sleep_step_secs = 0.0;
    config.job_runner.recovery_step_secs = 0.0;
    config
}

fn test_state(source: Arc<ReplaySource>) -> Arc<AppState> {
    Arc::new(AppState::in_memory(test_config(), source).unwrap())
}

/// Daily store with 1 March and 20 March present: twelve trading days missing
fn seed_sparse_daily(state: &AppState) {
    state
        .duckdb
        .write_batch(
            "RELIANCE",
            Timeframe::Daily,
            &[candle(ist(1, 0, 0)), candle(ist(20, 0, 0))],
        )
        .unwrap();
}

#[tokio::test]
async fn test_daily_backfill_heals_five_days_per_run() {
    let source = Arc::new(ReplaySource::new());
    let missing_days = [4, 5, 6, 7, 8, 11, 12, 13, 14, 15, 18, 19];
    source.insert(
        "RELIANCE",
        Timeframe::Daily,
        missing_days.iter().map(|d| candle(ist(*d, 0, 0))).collect(),
    );
    let state = test_state(source);
    seed_sparse_daily(&state);

    let missing = BackfillService::missing_trading_days(&state, "RELIANCE", day(1), day(20)).unwrap();
    assert_eq!(missing.len(), 12);

    let result = BackfillService::backfill_daily(&state, "RELIANCE", &missing).await;
    assert_eq!(result.attempted.len(), 5);
    assert_eq!(result.status, ReportStatus::Partial);
    assert_eq!(state.duckdb.candle_count("RELIANCE", Timeframe::Daily).unwrap(), 7);

    // Two more cycles close the remaining gap
    let now = ist(25, 18, 0);
    CompletenessService::run(&state, now).await.unwrap();
    CompletenessService::run(&state, now + Duration::minutes(1)).await.unwrap();
    assert_eq!(state.duckdb.candle_count("RELIANCE", Timeframe::Daily).unwrap(), 14);

    let outcomes = state
        .sqlite
        .read_recent("RELIANCE", None, CheckType::AutoBackfill, 10)
        .unwrap();
    assert_eq!(outcomes[0].status, ReportStatus::Complete);
    assert_eq!(outcomes[0].details["healed_count"], 2);
    assert_eq!(outcomes[1].status, ReportStatus::Partial);
    assert_eq!(outcomes[1].details["remaining_count"], 2);
}

#[tokio::test]
async fn test_stuck_daily_backfill_escalates_on_fourth_partial() {
    let source = Arc::new(ReplaySource::new());
    source.set_outage("RELIANCE", true);
    let state = test_state(source);
    seed_sparse_daily(&state);

    let now = ist(25, 18, 0);
    for run in 0..4 {
        let summary = CompletenessService::run(&state, now + Duration::minutes(run))
            .await
            .unwrap();
        assert_eq!(summary.backfills_triggered, 1);
        assert_eq!(summary.alerts_raised, if run == 3 { 1 } else { 0 });
    }

    let alerts = AlertService::active_alerts(&state).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].check_type, CheckType::AutoBackfillAlert);
    assert_eq!(alerts[0].details["consecutive_partial_days"], 4);
    assert_eq!(alerts[0].details["threshold"], 3);

    // Only a human closes a daily alert
    let id = alerts[0].id;
    assert!(AlertService::acknowledge(&state, id, "ops").unwrap());
    assert!(AlertService::resolve(&state, id, "ops", Some("token refreshed")).unwrap());
    assert!(!AlertService::resolve(&state, id, "ops", None).unwrap());
    assert!(!AlertService::acknowledge(&state, id, "ops").unwrap());
}

#[tokio::test]
async fn test_fifteen_minute_session_heals_two_missing_candles() {
    let source = Arc::new(ReplaySource::new());
    source.insert("X", Timeframe::FifteenMinute, session(5, Timeframe::FifteenMinute));
    let state = test_state(source.clone());

    let mut stored = session(5, Timeframe::FifteenMinute);
    assert_eq!(stored.len(), 25);
    stored.remove(10);
    stored.remove(3);
    state
        .duckdb
        .write_batch("X", Timeframe::FifteenMinute, &stored)
        .unwrap();

    let summary = CompletenessService::run(&state, ist(5, 16, 0)).await.unwrap();
    assert_eq!(summary.backfills_triggered, 1);
    assert_eq!(summary.alerts_raised, 0);

    let check = state
        .sqlite
        .read_recent("X", Some("15M"), CheckType::IntradayCompleteness, 1)
        .unwrap();
    assert_eq!(check[0].status, ReportStatus::Fail);
    assert_eq!(check[0].details["missing_count"], 2);
    assert_eq!(check[0].details["expected_count"], 25);

    let healed = state
        .sqlite
        .read_recent("X", Some("15M"), CheckType::IntradayBackfill, 1)
        .unwrap();
    assert_eq!(healed[0].status, ReportStatus::Complete);
    assert_eq!(healed[0].details["attempted"], 2);
    assert_eq!(healed[0].details["inserted"], 2);
    assert_eq!(healed[0].details["skipped"], 0);
    assert_eq!(healed[0].details["trade_date"], "2024-03-05");
    assert_eq!(source.login_count(), 1);

    assert_eq!(state.duckdb.candle_count("X", Timeframe::FifteenMinute).unwrap(), 25);
    assert!(AlertService::active_alerts(&state).unwrap().is_empty());

    let summary = CompletenessService::run(&state, ist(5, 16, 5)).await.unwrap();
    assert_eq!(summary.backfills_triggered, 0);
}

#[tokio::test]
async fn test_intraday_alert_auto_resolves_after_recovery() {
    let source = Arc::new(ReplaySource::new());
    source.insert("INFY", Timeframe::FiveMinute, session(5, Timeframe::FiveMinute));
    source.set_outage("INFY", true);
    let state = test_state(source.clone());

    let mut stored = session(5, Timeframe::FiveMinute);
    stored.remove(40);
    state
        .duckdb
        .write_batch("INFY", Timeframe::FiveMinute, &stored)
        .unwrap();

    let now = ist(5, 16, 0);
    for run in 0..3 {
        CompletenessService::run(&state, now + Duration::minutes(run))
            .await
            .unwrap();
    }
    let alerts = AlertService::active_alerts(&state).unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(AlertService::acknowledge(&state, alerts[0].id, "ops").unwrap());

    source.set_outage("INFY", false);
    let healing = CompletenessService::run(&state, now + Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(healing.alerts_auto_resolved, 0);

    let passing = CompletenessService::run(&state, now + Duration::minutes(4))
        .await
        .unwrap();
    assert_eq!(passing.alerts_auto_resolved, 1);
    assert!(AlertService::active_alerts(&state).unwrap().is_empty());

    let history = AlertService::alert_history(&state, 10).unwrap();
    assert_eq!(history[0].status, ReportStatus::Resolved);
    assert_eq!(history[0].details["resolved_by"], "auto");
    assert_eq!(history[0].details["acknowledged_by"], "ops");

    let health = AlertService::symbol_health(&state).unwrap();
    assert_eq!(health[0].symbol, "INFY");
    assert_eq!(health[0].intraday_completeness["5M"], ReportStatus::Pass);
}

#[tokio::test]
async fn test_trading_day_flow_ingest_then_reconcile() {
    let source = Arc::new(ReplaySource::new());
    for tf in Timeframe::INGESTED_INTRADAY {
        source.insert("TCS", tf, session(5, tf));
    }
    let state = test_state(source.clone());
    let runner = JobRunner::new(state.clone());
    let symbols = vec!["TCS".to_string()];

    let skipped = runner.run_job("intraday_15m", &symbols, ist(5, 8, 30)).await.unwrap();
    assert!(skipped.skipped);

    let summary = runner.run_job("intraday_15m", &symbols, ist(5, 12, 0)).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    // Safe end is 11:15, so 09:15 .. 11:00
    assert_eq!(state.duckdb.candle_count("TCS", Timeframe::FifteenMinute).unwrap(), 8);
    assert_eq!(
        state.duckdb.last_timestamp("TCS", Timeframe::FifteenMinute).unwrap(),
        Some(ist(5, 11, 0))
    );

    let outcome = runner.run_reconciliation(&symbols, ist(5, 16, 30)).await.unwrap();
    let governance = match outcome {
        ReconciliationOutcome::Completed {
            failures,
            governance,
            ..
        } => {
            assert_eq!(failures, 0);
            governance.unwrap()
        }
        other => panic!("reconciliation skipped: {:?}", other),
    };
    assert_eq!(governance.pairs_checked, 3);
    assert_eq!(governance.backfills_triggered, 0);

    assert_eq!(state.duckdb.candle_count("TCS", Timeframe::FifteenMinute).unwrap(), 25);
    assert_eq!(state.duckdb.candle_count("TCS", Timeframe::FiveMinute).unwrap(), 75);
    assert_eq!(state.duckdb.candle_count("TCS", Timeframe::OneMinute).unwrap(), 375);

    let latest = state.sqlite.latest_statuses().unwrap();
    assert!(latest
        .iter()
        .filter(|s| s.check_type == CheckType::IntradayCompleteness)
        .all(|s| s.status == ReportStatus::Pass));
}

#[tokio::test]
async fn test_holiday_session_is_not_audited() {
    let source = Arc::new(ReplaySource::new());
    let state = test_state(source);
    state
        .sqlite
        .insert_holiday("NSE", day(8), Some("Mahashivratri"))
        .unwrap();

    let mut stray = session(8, Timeframe::FifteenMinute);
    stray.truncate(5);
    state
        .duckdb
        .write_batch("INFY", Timeframe::FifteenMinute, &stray)
        .unwrap();

    let summary = CompletenessService::run(&state, ist(8, 16, 0)).await.unwrap();
    // Freshness only
    assert_eq!(summary.reports_written, 1);
    assert_eq!(summary.backfills_triggered, 0);
}

#[tokio::test]
async fn test_on_disk_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.data_dir = dir.path().to_path_buf();

    {
        let state = AppState::new(config.clone()).unwrap();
        state
            .duckdb
            .write_batch("SBIN", Timeframe::FiveMinute, &session(5, Timeframe::FiveMinute))
            .unwrap();
        state.sqlite.insert_holiday("NSE", day(25), Some("Holi")).unwrap();
    }

    let sqlite = Arc::new(SqliteDb::new(&config.sqlite_path()).unwrap());
    let duckdb = Arc::new(DuckDb::new(&config.duckdb_path()).unwrap());
    let state = AppState::from_parts(config, sqlite, duckdb, Arc::new(ReplaySource::new()));

    assert_eq!(state.duckdb.candle_count("SBIN", Timeframe::FiveMinute).unwrap(), 75);
    assert!(!state.calendar.is_trading_day("NSE", day(25)).unwrap());

    let summary = CompletenessService::run(&state, ist(5, 15, 45)).await.unwrap();
    assert_eq!(summary.pairs_checked, 1);
    assert_eq!(summary.failures_isolated, 0);
    let freshness = state
        .sqlite
        .read_recent("SBIN", Some("5M"), CheckType::Freshness, 5)
        .unwrap();
    assert_eq!(freshness.len(), 1);
}
