//! Pipeline configuration
//!
//! Defaults reproduce the production throttles. A JSON file and a handful of
//! environment variables can override them.

use crate::error::{AppError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `historify.duckdb` and `sentinel.db`
    pub data_dir: PathBuf,
    pub exchange: String,
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
    /// Symbols driven by the scheduler jobs
    pub symbols: Vec<String>,
    pub fetch_timeout_secs: u64,
    /// How many recent stored trade dates the completeness check inspects
    pub completeness_recent_days: usize,
    pub backfill: BackfillConfig,
    pub escalation: EscalationConfig,
    pub job_runner: JobRunnerConfig,
    pub zerodha: ZerodhaConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            exchange: "NSE".to_string(),
            session_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            session_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            symbols: vec!["RELIANCE".to_string(), "INFY".to_string(), "TCS".to_string()],
            fetch_timeout_secs: 30,
            completeness_recent_days: 5,
            backfill: BackfillConfig::default(),
            escalation: EscalationConfig::default(),
            job_runner: JobRunnerConfig::default(),
            zerodha: ZerodhaConfig::default(),
        }
    }
}

/// Backfill throttles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub max_days_per_run: usize,
    pub max_lookback_days: i64,
    pub max_candles_per_run: usize,
    /// Minimum spacing between single-candle fetches
    pub api_sleep_secs: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_days_per_run: 5,
            max_lookback_days: 3,
            max_candles_per_run: 200,
            api_sleep_secs: 1.5,
        }
    }
}

/// Consecutive-partial thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Daily alert when the streak is strictly greater than this
    pub max_partial_days: usize,
    /// Intraday alert when the streak reaches this
    pub max_intraday_partial_runs: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_partial_days: 3,
            max_intraday_partial_runs: 3,
        }
    }
}

/// Batching and adaptive inter-batch delay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRunnerConfig {
    pub batch_size: usize,
    pub min_sleep_secs: f64,
    pub max_sleep_secs: f64,
    pub sleep_step_secs: f64,
    pub recovery_step_secs: f64,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            min_sleep_secs: 0.5,
            max_sleep_secs: 10.0,
            sleep_step_secs: 1.0,
            recovery_step_secs: 0.5,
        }
    }
}

/// Kite Connect access for historical candles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZerodhaConfig {
    pub api_key: String,
    pub access_token: String,
    /// Trading symbol -> Kite instrument token
    pub instruments: HashMap<String, u64>,
    /// Requests per second allowed by Kite
    pub requests_per_second: u32,
}

impl Default for ZerodhaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            access_token: String::new(),
            instruments: HashMap::new(),
            requests_per_second: 3,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults (or `HISTORIFY_CONFIG` file) with environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("HISTORIFY_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(dir) = std::env::var("HISTORIFY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(exchange) = std::env::var("HISTORIFY_EXCHANGE") {
            config.exchange = exchange;
        }
        if let Ok(key) = std::env::var("KITE_API_KEY") {
            config.zerodha.api_key = key;
        }
        if let Ok(token) = std::env::var("KITE_ACCESS_TOKEN") {
            config.zerodha.access_token = token;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_open >= self.session_close {
            return Err(AppError::Config(format!(
                "session_open {} must be before session_close {}",
                self.session_open, self.session_close
            )));
        }
        if self.job_runner.batch_size == 0 {
            return Err(AppError::Config("job_runner.batch_size must be > 0".to_string()));
        }
        if self.backfill.max_days_per_run == 0 || self.backfill.max_candles_per_run == 0 {
            return Err(AppError::Config("backfill limits must be > 0".to_string()));
        }
        if self.backfill.api_sleep_secs < 0.0 || self.job_runner.min_sleep_secs < 0.0 {
            return Err(AppError::Config("sleep intervals must not be negative".to_string()));
        }
        if self.job_runner.min_sleep_secs > self.job_runner.max_sleep_secs {
            return Err(AppError::Config(
                "job_runner.min_sleep_secs exceeds max_sleep_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn duckdb_path(&self) -> PathBuf {
        self.data_dir.join("historify.duckdb")
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("sentinel.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_production_throttles() {
        let config = PipelineConfig::default();
        assert_eq!(config.backfill.max_days_per_run, 5);
        assert_eq!(config.backfill.max_candles_per_run, 200);
        assert_eq!(config.escalation.max_partial_days, 3);
        assert_eq!(config.job_runner.batch_size, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"exchange": "BSE", "backfill": {{"max_days_per_run": 2}}, "session_close": "15:00:00"}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.exchange, "BSE");
        assert_eq!(config.backfill.max_days_per_run, 2);
        assert_eq!(config.backfill.max_lookback_days, 3);
        assert_eq!(config.session_close, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
    }

    #[test]
    fn test_inverted_session_rejected() {
        let mut config = PipelineConfig::default();
        config.session_close = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
