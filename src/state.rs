//! Application state management

use crate::calendar::{HolidayCalendar, TradingCalendar};
use crate::config::PipelineConfig;
use crate::db::duckdb::DuckDb;
use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::providers::{CandleSource, ZerodhaCandleSource};
use crate::throttle::RequestPacer;
use std::sync::Arc;

/// Everything a pipeline operation needs, injected explicitly
pub struct AppState {
    pub config: PipelineConfig,

    /// SQLite connection (holidays, quality reports)
    pub sqlite: Arc<SqliteDb>,

    /// DuckDB connection for candle history
    pub duckdb: Arc<DuckDb>,

    pub calendar: Arc<dyn TradingCalendar>,

    pub source: Arc<dyn CandleSource>,

    /// Spacing between single-candle backfill fetches
    pub backfill_pacer: RequestPacer,
}

impl AppState {
    /// Open the on-disk databases and the Kite source described by `config`
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let sqlite_path = config.sqlite_path();
        let duckdb_path = config.duckdb_path();
        tracing::info!("SQLite database: {:?}", sqlite_path);
        tracing::info!("DuckDB database: {:?}", duckdb_path);

        let sqlite = Arc::new(SqliteDb::new(&sqlite_path)?);
        let duckdb = Arc::new(DuckDb::new(&duckdb_path)?);
        let source: Arc<dyn CandleSource> = Arc::new(ZerodhaCandleSource::new(&config.zerodha)?);

        Ok(Self::from_parts(config, sqlite, duckdb, source))
    }

    /// In-memory databases around an arbitrary source
    pub fn in_memory(config: PipelineConfig, source: Arc<dyn CandleSource>) -> Result<Self> {
        let sqlite = Arc::new(SqliteDb::open_in_memory()?);
        let duckdb = Arc::new(DuckDb::open_in_memory()?);
        Ok(Self::from_parts(config, sqlite, duckdb, source))
    }

    pub fn from_parts(
        config: PipelineConfig,
        sqlite: Arc<SqliteDb>,
        duckdb: Arc<DuckDb>,
        source: Arc<dyn CandleSource>,
    ) -> Self {
        let calendar: Arc<dyn TradingCalendar> = Arc::new(HolidayCalendar::new(sqlite.clone()));
        let backfill_pacer = RequestPacer::from_secs_f64(config.backfill.api_sleep_secs);

        Self {
            config,
            sqlite,
            duckdb,
            calendar,
            source,
            backfill_pacer,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.config.exchange
    }
}
