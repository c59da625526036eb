//! Netprobe agent
//!
//! Pings and traceroutes every configured target on a fixed interval,
//! geolocates the hops and appends each cycle to the outcome log.

use anyhow::{Context, Result};
use netprobe_agent::{api, config::AgentConfig, preflight};
use netprobe_lib::{
    cycle::{PeriodicScheduler, ProbeCycleOrchestrator},
    geo::{HttpGeoResolver, LocationCache, MemoryCacheStore},
    health::{components, HealthRegistry},
    observability::{ProbeMetrics, StructuredLogger},
    runner::{SystemProbeRunner, PING_PROGRAM, TRACEROUTE_PROGRAM},
    store::{FileOutcomeStore, FileTargetRepository, OutcomeStore},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting netprobe-agent");

    let config = AgentConfig::load()?;
    info!(
        agent_name = %config.agent_name,
        interval_secs = config.test_interval_secs,
        workers = config.worker_pool_size,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::PROBE_RUNNER).await;
    health_registry.register(components::GEO_CACHE).await;
    health_registry.register(components::OUTCOME_STORE).await;

    let metrics = ProbeMetrics::new();
    let logger = StructuredLogger::new(&config.agent_name);

    let missing = preflight::missing_tools(&[PING_PROGRAM, TRACEROUTE_PROGRAM]);
    if !missing.is_empty() {
        health_registry
            .set_degraded(
                components::PROBE_RUNNER,
                format!("missing tools: {}", missing.join(", ")),
            )
            .await;
    }

    let resolver = HttpGeoResolver::new(config.geo_resolver_config())?;
    let locations = LocationCache::new(
        Arc::new(MemoryCacheStore::new()),
        Arc::new(resolver),
        config.geo_cache_ttl(),
    )
    .with_health(health_registry.clone());

    let outcomes: Arc<dyn OutcomeStore> = Arc::new(
        FileOutcomeStore::open_with_retention(config.outcomes_path(), config.retained_rows)
            .with_context(|| {
                format!(
                    "Failed to open outcome log at {}",
                    config.outcomes_path().display()
                )
            })?,
    );

    let orchestrator = Arc::new(
        ProbeCycleOrchestrator::builder()
            .runner(Arc::new(SystemProbeRunner::new(config.ping_timeout())))
            .locations(locations)
            .targets(Arc::new(FileTargetRepository::new(&config.targets_file)))
            .outcomes(Arc::clone(&outcomes))
            .config(config.cycle_config())
            .health(health_registry.clone())
            .logger(logger.clone())
            .build()?,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let scheduler = PeriodicScheduler::new(Arc::clone(&orchestrator), config.scheduler_config())
        .with_health(health_registry.clone())
        .with_logger(logger.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        orchestrator,
        outcomes,
    ));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    logger.log_startup(AGENT_VERSION, &config.targets_file.display().to_string());

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with an error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
