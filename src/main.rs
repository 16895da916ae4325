// One scheduler invocation per process: the external cron driver picks the
// job, this binary runs it once and exits.

use anyhow::Context;
use chrono::Utc;
use historify_sentinel::config::PipelineConfig;
use historify_sentinel::scheduler::{JobRunner, JOB_REGISTRY};
use historify_sentinel::services::AlertService;
use historify_sentinel::state::AppState;
use std::sync::Arc;

fn usage() -> String {
    let jobs: Vec<&str> = JOB_REGISTRY.iter().map(|job| job.name).collect();
    format!(
        "usage: historify-sentinel <{}|governance|reconcile|alerts|health>",
        jobs.join("|")
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    historify_sentinel::init_tracing().context("installing tracing subscriber")?;

    let command = std::env::args().nth(1).ok_or_else(|| anyhow::anyhow!(usage()))?;

    let config = PipelineConfig::from_env().context("loading configuration")?;
    let symbols = config.symbols.clone();
    let state = Arc::new(AppState::new(config).context("opening pipeline state")?);
    let runner = JobRunner::new(state.clone());
    let now = Utc::now();

    tracing::info!("Starting Historify Sentinel: {}", command);

    let output = match command.as_str() {
        "governance" => serde_json::to_string_pretty(&runner.run_governance(now).await?)?,
        "reconcile" => {
            serde_json::to_string_pretty(&runner.run_reconciliation(&symbols, now).await?)?
        }
        "alerts" => serde_json::to_string_pretty(&AlertService::active_alerts(&state)?)?,
        "health" => serde_json::to_string_pretty(&AlertService::symbol_health(&state)?)?,
        job => serde_json::to_string_pretty(
            &runner
                .run_job(job, &symbols, now)
                .await
                .with_context(|| usage())?,
        )?,
    };

    println!("{}", output);
    Ok(())
}
