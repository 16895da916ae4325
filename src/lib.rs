//! Historify Sentinel - self-healing candle ingestion
//!
//! Keeps OHLCV history for Indian equities current and complete: incremental
//! ingestion from the broker, holiday-aware completeness audits, throttled
//! backfill of what is missing, and an alert lifecycle for gaps that do not
//! heal on their own.

pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod throttle;
pub mod timeframe;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Fails if a global subscriber is already installed.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "historify_sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_tracing_init_is_reported() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
