//! Scheduler support
//!
//! The cron driver itself lives outside this crate. It looks jobs up in the
//! registry, calls the [`JobRunner`] and guarantees at most one concurrent
//! run per job id.

pub mod guards;
pub mod job_registry;
pub mod job_runner;

pub use guards::is_market_open;
pub use job_registry::{get_job_config, JobConfig, RunKind, JOB_REGISTRY};
pub use job_runner::{JobRunner, JobSummary};

use crate::timeframe::MARKET_TZ;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use std::time::Duration;

/// Time from `now` until the next `hour:minute` in market time
pub fn duration_until(hour: u32, minute: u32, now: DateTime<Utc>) -> Duration {
    let now_local = now.with_timezone(&MARKET_TZ);
    let target = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let now_time = now_local.time();

    let secs = if now_time < target {
        // Later today
        (target - now_time).num_seconds() as u64
    } else {
        // Tomorrow
        let until_midnight = (24 * 3600) - now_time.num_seconds_from_midnight() as u64;
        until_midnight + target.num_seconds_from_midnight() as u64
    };

    Duration::from_secs(secs)
}
