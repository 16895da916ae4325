//! Scheduled job definitions
//!
//! Cadence is the external driver's business; the core only needs to know
//! which timeframe a job ingests and whether it runs during market hours.

use crate::error::{AppError, Result};
use crate::timeframe::Timeframe;
use serde::Serialize;

/// When a job is expected to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunKind {
    /// Once per day after the close
    Eod,
    /// Repeatedly while the market is open
    Intraday,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobConfig {
    pub name: &'static str,
    pub timeframe: Timeframe,
    pub tier: u8,
    /// None keeps candles forever
    pub retention_days: Option<u32>,
    pub run_kind: RunKind,
    /// Suggested cron expression, market timezone
    pub cron: &'static str,
    /// How late a missed run may still start
    pub misfire_grace_secs: u64,
}

pub const JOB_REGISTRY: [JobConfig; 4] = [
    JobConfig {
        name: "daily_eod",
        timeframe: Timeframe::Daily,
        tier: 1,
        retention_days: None,
        run_kind: RunKind::Eod,
        cron: "0 18 * * *",
        misfire_grace_secs: 3600,
    },
    JobConfig {
        name: "intraday_15m",
        timeframe: Timeframe::FifteenMinute,
        tier: 2,
        retention_days: Some(365),
        run_kind: RunKind::Intraday,
        cron: "*/15 * * * *",
        misfire_grace_secs: 300,
    },
    JobConfig {
        name: "intraday_5m",
        timeframe: Timeframe::FiveMinute,
        tier: 2,
        retention_days: Some(180),
        run_kind: RunKind::Intraday,
        cron: "*/5 * * * *",
        misfire_grace_secs: 180,
    },
    JobConfig {
        name: "intraday_1m",
        timeframe: Timeframe::OneMinute,
        tier: 3,
        retention_days: Some(60),
        run_kind: RunKind::Intraday,
        cron: "* * * * *",
        misfire_grace_secs: 30,
    },
];

/// Look up a job by name
pub fn get_job_config(name: &str) -> Result<&'static JobConfig> {
    JOB_REGISTRY
        .iter()
        .find(|job| job.name == name)
        .ok_or_else(|| AppError::Config(format!("Unknown job '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let job = get_job_config("intraday_5m").unwrap();
        assert_eq!(job.timeframe, Timeframe::FiveMinute);
        assert_eq!(job.run_kind, RunKind::Intraday);
        assert_eq!(job.retention_days, Some(180));

        let eod = get_job_config("daily_eod").unwrap();
        assert_eq!(eod.timeframe, Timeframe::Daily);
        assert_eq!(eod.run_kind, RunKind::Eod);
        assert_eq!(eod.retention_days, None);
    }

    #[test]
    fn test_unknown_job_is_config_error() {
        assert!(matches!(get_job_config("intraday_10m"), Err(AppError::Config(_))));
    }
}
