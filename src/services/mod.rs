//! Services Layer
//!
//! Pipeline logic shared by the scheduler jobs and the binary. Services are
//! stateless; every call takes the injected [`AppState`](crate::state::AppState).
//!
//! # Architecture
//!
//! ```text
//! Scheduler --> JobRunner ──┬──> IngestionService ──────────┐
//!                           ├──> CompletenessService ──┐    ├──> CandleSource
//!                           └──> ReconciliationService │    └──> DuckDB
//!                                                      ├──> BackfillService
//!                                                      └──> AlertService --> SQLite
//! ```
//!
//! # Services
//!
//! - `IngestionService` - Incremental fetch-and-write with gap re-fetch
//! - `CompletenessService` - Governance cycle (coverage, freshness, completeness)
//! - `BackfillService` - Throttled daily and intraday healing
//! - `AlertService` - Escalation, alert lifecycle, health summaries
//! - `ReconciliationService` - End-of-day session re-fetch

pub mod alert_service;
pub mod backfill_service;
pub mod completeness_service;
pub mod ingestion_service;
pub mod reconciliation_service;

pub use alert_service::{AlertService, SymbolHealth};
pub use backfill_service::{BackfillService, DailyBackfillResult, IntradayBackfillResult};
pub use completeness_service::{CompletenessService, GovernanceSummary};
pub use ingestion_service::{IngestOutcome, IngestionReport, IngestionService};
pub use reconciliation_service::{ReconciliationOutcome, ReconciliationService};
