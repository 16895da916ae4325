//! SQLite data models

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-width UTC format so lexical order matches time order
pub const RUN_TS_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_run_ts(ts: DateTime<Utc>) -> String {
    ts.format(RUN_TS_FMT).to_string()
}

/// Market holiday entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHoliday {
    pub exchange: String,
    pub holiday_date: String,
    pub year: i32,
    pub description: Option<String>,
}

/// Kind of governance check recorded in `data_quality_reports`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    DailyCoverage,
    AutoBackfill,
    AutoBackfillAlert,
    Freshness,
    IntradayCompleteness,
    IntradayBackfill,
    IntradayBackfillAlert,
}

impl CheckType {
    pub const ALERTS: [CheckType; 2] = [CheckType::AutoBackfillAlert, CheckType::IntradayBackfillAlert];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::DailyCoverage => "daily_coverage",
            CheckType::AutoBackfill => "auto_backfill",
            CheckType::AutoBackfillAlert => "auto_backfill_alert",
            CheckType::Freshness => "freshness",
            CheckType::IntradayCompleteness => "intraday_completeness",
            CheckType::IntradayBackfill => "intraday_backfill",
            CheckType::IntradayBackfillAlert => "intraday_backfill_alert",
        }
    }
}

impl FromStr for CheckType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily_coverage" => Ok(CheckType::DailyCoverage),
            "auto_backfill" => Ok(CheckType::AutoBackfill),
            "auto_backfill_alert" => Ok(CheckType::AutoBackfillAlert),
            "freshness" => Ok(CheckType::Freshness),
            "intraday_completeness" => Ok(CheckType::IntradayCompleteness),
            "intraday_backfill" => Ok(CheckType::IntradayBackfill),
            "intraday_backfill_alert" => Ok(CheckType::IntradayBackfillAlert),
            other => Err(AppError::Validation(format!("unknown check_type '{}'", other))),
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report status. Which values are meaningful depends on the check type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Pass,
    Fail,
    Complete,
    Partial,
    Skipped,
    Noop,
    Raised,
    Acked,
    Resolved,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pass => "PASS",
            ReportStatus::Fail => "FAIL",
            ReportStatus::Complete => "COMPLETE",
            ReportStatus::Partial => "PARTIAL",
            ReportStatus::Skipped => "SKIPPED",
            ReportStatus::Noop => "NOOP",
            ReportStatus::Raised => "RAISED",
            ReportStatus::Acked => "ACKED",
            ReportStatus::Resolved => "RESOLVED",
        }
    }

    /// Prior statuses from which an alert may move to `self`
    pub fn legal_predecessors(&self) -> &'static [ReportStatus] {
        match self {
            ReportStatus::Acked => &[ReportStatus::Raised],
            ReportStatus::Resolved => &[ReportStatus::Raised, ReportStatus::Acked],
            _ => &[],
        }
    }
}

impl FromStr for ReportStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(ReportStatus::Pass),
            "FAIL" => Ok(ReportStatus::Fail),
            "COMPLETE" => Ok(ReportStatus::Complete),
            "PARTIAL" => Ok(ReportStatus::Partial),
            "SKIPPED" => Ok(ReportStatus::Skipped),
            "NOOP" => Ok(ReportStatus::Noop),
            "RAISED" => Ok(ReportStatus::Raised),
            "ACKED" => Ok(ReportStatus::Acked),
            "RESOLVED" => Ok(ReportStatus::Resolved),
            other => Err(AppError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Report Details
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCoverageDetails {
    pub expected_trading_days: usize,
    pub actual_days: usize,
    pub coverage_pct: f64,
    pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoBackfillDetails {
    pub healed_days: Vec<String>,
    pub healed_count: usize,
    pub remaining_count: usize,
    pub throttle_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessDetails {
    pub last_candle_ts: String,
    pub lag_minutes: f64,
    pub threshold_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessDetails {
    pub trade_date: String,
    pub expected_count: usize,
    pub actual_count: usize,
    pub missing_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntradayBackfillDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_date: Option<String>,
    #[serde(default)]
    pub attempted: usize,
    #[serde(default)]
    pub inserted: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields written by acknowledge/resolve transitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertLifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAlertDetails {
    pub consecutive_partial_days: usize,
    pub threshold: usize,
    pub message: String,
    #[serde(flatten)]
    pub lifecycle: AlertLifecycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayAlertDetails {
    pub consecutive_partial_runs: usize,
    pub threshold: usize,
    pub trade_date: String,
    pub message: String,
    #[serde(flatten)]
    pub lifecycle: AlertLifecycle,
}

/// Evidence payload, one variant per check type.
///
/// Stored as the bare variant object in a JSON text column; the check_type
/// column selects the variant on the way back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportDetails {
    DailyCoverage(DailyCoverageDetails),
    AutoBackfill(AutoBackfillDetails),
    AutoBackfillAlert(DailyAlertDetails),
    Freshness(FreshnessDetails),
    IntradayCompleteness(CompletenessDetails),
    IntradayBackfill(IntradayBackfillDetails),
    IntradayBackfillAlert(IntradayAlertDetails),
}

impl ReportDetails {
    pub fn check_type(&self) -> CheckType {
        match self {
            ReportDetails::DailyCoverage(_) => CheckType::DailyCoverage,
            ReportDetails::AutoBackfill(_) => CheckType::AutoBackfill,
            ReportDetails::AutoBackfillAlert(_) => CheckType::AutoBackfillAlert,
            ReportDetails::Freshness(_) => CheckType::Freshness,
            ReportDetails::IntradayCompleteness(_) => CheckType::IntradayCompleteness,
            ReportDetails::IntradayBackfill(_) => CheckType::IntradayBackfill,
            ReportDetails::IntradayBackfillAlert(_) => CheckType::IntradayBackfillAlert,
        }
    }

    pub fn parse(check_type: CheckType, value: serde_json::Value) -> Result<Self> {
        Ok(match check_type {
            CheckType::DailyCoverage => ReportDetails::DailyCoverage(serde_json::from_value(value)?),
            CheckType::AutoBackfill => ReportDetails::AutoBackfill(serde_json::from_value(value)?),
            CheckType::AutoBackfillAlert => {
                ReportDetails::AutoBackfillAlert(serde_json::from_value(value)?)
            }
            CheckType::Freshness => ReportDetails::Freshness(serde_json::from_value(value)?),
            CheckType::IntradayCompleteness => {
                ReportDetails::IntradayCompleteness(serde_json::from_value(value)?)
            }
            CheckType::IntradayBackfill => {
                ReportDetails::IntradayBackfill(serde_json::from_value(value)?)
            }
            CheckType::IntradayBackfillAlert => {
                ReportDetails::IntradayBackfillAlert(serde_json::from_value(value)?)
            }
        })
    }
}

/// Report to append
#[derive(Debug, Clone)]
pub struct NewReport {
    pub run_ts: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: Option<String>,
    pub status: ReportStatus,
    pub details: ReportDetails,
    /// Governance cycle that produced the row, merged into details
    pub run_id: Option<String>,
}

impl NewReport {
    pub fn check_type(&self) -> CheckType {
        self.details.check_type()
    }
}

/// Stored report row
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub id: i64,
    pub run_ts: String,
    pub symbol: String,
    pub timeframe: Option<String>,
    pub check_type: CheckType,
    pub status: ReportStatus,
    pub details: serde_json::Value,
    pub created_at: String,
}

/// Latest status of one (symbol, timeframe, check_type) triple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestStatus {
    pub symbol: String,
    pub timeframe: Option<String>,
    pub check_type: CheckType,
    pub status: ReportStatus,
}
