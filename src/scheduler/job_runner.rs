//! Job runner
//!
//! Entry point for the external scheduler. Ingestion jobs process symbols
//! in fixed-size batches with an adaptive pause between batches.

use super::guards;
use super::job_registry::{get_job_config, RunKind};
use crate::error::{ErrorResponse, Result};
use crate::services::{
    CompletenessService, GovernanceSummary, IngestionService, ReconciliationOutcome,
    ReconciliationService,
};
use crate::state::AppState;
use crate::throttle::AdaptiveDelay;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one job invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSummary {
    pub job: String,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per failed symbol
    pub errors: Vec<ErrorResponse>,
    /// Guard declined to run the job
    pub skipped: bool,
}

pub struct JobRunner {
    state: Arc<AppState>,
}

impl JobRunner {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run an ingestion job over `symbols`.
    ///
    /// Intraday jobs are skipped outside market hours. A batch with any
    /// failed symbol counts as an error for the adaptive delay.
    pub async fn run_job(
        &self,
        job_name: &str,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<JobSummary> {
        let job = get_job_config(job_name)?;
        let state = self.state.as_ref();
        let mut summary = JobSummary {
            job: job.name.to_string(),
            ..Default::default()
        };

        if job.run_kind == RunKind::Intraday
            && !guards::is_market_open(
                state.calendar.as_ref(),
                state.exchange(),
                state.config.session_open,
                state.config.session_close,
                now,
            )
        {
            info!("Market closed - skipping {}", job.name);
            summary.skipped = true;
            return Ok(summary);
        }

        let cfg = &state.config.job_runner;
        let batch_size = cfg.batch_size.max(1);
        let mut delay = AdaptiveDelay::new(
            cfg.min_sleep_secs,
            cfg.max_sleep_secs,
            cfg.sleep_step_secs,
            cfg.recovery_step_secs,
        );

        info!("JOB START | {} | symbols={}", job.name, symbols.len());

        for (i, batch) in symbols.chunks(batch_size).enumerate() {
            let batch_no = i + 1;
            summary.batches += 1;
            info!(
                "JOB {} | batch {} | sleep={:.1}s | {:?}",
                job.name,
                batch_no,
                delay.current().as_secs_f64(),
                batch
            );

            let report = IngestionService::run_ingestion(state, job.timeframe, batch, now).await;
            summary.succeeded += report.succeeded.len();
            summary.failed += report.failed.len();
            summary.errors.extend(report.errors.iter().cloned());

            if report.has_errors() {
                delay.on_error();
                warn!(
                    "JOB ERROR | {} | batch={:?} | streak={}",
                    job.name,
                    report.failed,
                    delay.error_streak()
                );
            } else {
                delay.on_success();
            }

            if batch_no * batch_size < symbols.len() {
                tokio::time::sleep(delay.current()).await;
            }
        }

        info!("JOB END | {}", job.name);
        Ok(summary)
    }

    pub async fn run_governance(&self, now: DateTime<Utc>) -> Result<GovernanceSummary> {
        CompletenessService::run(&self.state, now).await
    }

    pub async fn run_reconciliation(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        ReconciliationService::run_eod(&self.state, symbols, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::AppError;
    use crate::providers::ReplaySource;
    use crate::timeframe::MARKET_TZ;
    use chrono::TimeZone;

    fn ist(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        MARKET_TZ
            .with_ymd_and_hms(2024, 3, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn runner(source: Arc<ReplaySource>) -> JobRunner {
        let mut config = PipelineConfig::default();
        config.job_runner.min_sleep_secs = 0.0;
        config.job_runner.sleep_step_secs = 0.0;
        config.job_runner.recovery_step_secs = 0.0;
        JobRunner::new(Arc::new(AppState::in_memory(config, source).unwrap()))
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_intraday_job_skipped_outside_market_hours() {
        let source = Arc::new(ReplaySource::new());
        let runner = runner(source.clone());

        let summary = runner
            .run_job("intraday_5m", &symbols(&["INFY"]), ist(5, 8, 0))
            .await
            .unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.batches, 0);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batches_and_failure_isolation() {
        let source = Arc::new(ReplaySource::new());
        source.set_outage("TCS", true);
        let runner = runner(source.clone());

        let names = symbols(&["RELIANCE", "INFY", "TCS", "HDFCBANK", "SBIN"]);
        let summary = runner.run_job("intraday_15m", &names, ist(5, 11, 0)).await.unwrap();

        assert!(!summary.skipped);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(source.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_eod_job_ignores_market_hours() {
        let source = Arc::new(ReplaySource::new());
        let runner = runner(source.clone());

        let summary = runner
            .run_job("daily_eod", &symbols(&["INFY"]), ist(9, 18, 0))
            .await
            .unwrap();
        assert!(!summary.skipped);
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let runner = runner(Arc::new(ReplaySource::new()));
        let err = runner.run_job("weekly", &[], ist(5, 11, 0)).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
