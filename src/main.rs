//! Regulatory news pipeline, binary entrypoint.
//! Wires the in-memory stores, the demo fixture sources and the enricher, then
//! either runs once (`--once`) or starts the scheduler next to `/metrics`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use regwatch::enrich::build_enricher_from_config;
use regwatch::ingest::providers::FixtureConnector;
use regwatch::ingest::types::{SourceConnector, SourceType};
use regwatch::metrics::Metrics;
use regwatch::{
    run_guarded, spawn_scheduler, PipelineConfig, PipelineDeps, PipelineOptions, RunLock,
    SchedulerCfg, TriggerSource,
};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9000";

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regwatch=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn demo_connectors() -> Vec<Arc<dyn SourceConnector>> {
    vec![
        Arc::new(FixtureConnector::from_json(
            "eu-commission",
            "European Commission",
            SourceType::EuOfficial,
            include_str!("../demos/eu_official.json"),
        )),
        Arc::new(FixtureConnector::from_json(
            "gs1-nl",
            "GS1 Netherlands",
            SourceType::Gs1Official,
            include_str!("../demos/gs1_official.json"),
        )),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load_default()
        .context("loading pipeline config")?
        .with_env_overrides();
    let once = std::env::args().any(|a| a == "--once");

    let enricher = build_enricher_from_config(&config.ai);
    info!(enricher = enricher.name(), mode = %config.scheduler.mode, "pipeline configured");

    let interval = Duration::from_secs(config.scheduler.interval_secs);
    let mode = Some(config.scheduler.mode.clone());
    let (deps, _store) = PipelineDeps::in_memory(demo_connectors(), enricher, config);
    let deps = Arc::new(deps);
    let lock = Arc::new(RunLock::new());

    if once {
        let opts = PipelineOptions {
            mode,
            triggered_by: TriggerSource::Manual,
            now: None,
        };
        if let Some(result) = run_guarded(&deps, &lock, opts).await {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        return Ok(());
    }

    let metrics = Metrics::init()?;
    let addr = std::env::var("METRICS_ADDR").unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    info!(%addr, "serving /metrics");

    let scheduler = spawn_scheduler(deps, lock, SchedulerCfg { interval, mode });

    tokio::select! {
        served = axum::serve(listener, metrics.router()) => {
            served.context("metrics server")?;
        }
        joined = scheduler => {
            if let Err(e) = joined {
                warn!(error = %e, "scheduler task ended");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
