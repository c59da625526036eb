//! Periodic scheduler
//!
//! Triggers a probe cycle on a fixed interval. A tick that arrives while the
//! previous cycle is still running is skipped, never queued.

use super::ProbeCycleOrchestrator;
use crate::health::{components, HealthRegistry};
use crate::observability::{ProbeMetrics, StructuredLogger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time between cycle starts
pub const DEFAULT_TEST_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for the periodic scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycle starts (default: 300 seconds)
    pub interval: Duration,
    /// Start the first cycle immediately instead of after one interval
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TEST_INTERVAL,
            run_on_startup: true,
        }
    }
}

/// Counters kept by a running scheduler
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles_started: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl SchedulerStats {
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::SeqCst)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::SeqCst)
    }
}

/// Fires probe cycles on an interval until shutdown
pub struct PeriodicScheduler {
    orchestrator: Arc<ProbeCycleOrchestrator>,
    config: SchedulerConfig,
    health: HealthRegistry,
    stats: Arc<SchedulerStats>,
    metrics: ProbeMetrics,
    logger: StructuredLogger,
}

impl PeriodicScheduler {
    pub fn new(orchestrator: Arc<ProbeCycleOrchestrator>, config: SchedulerConfig) -> Self {
        Self {
            orchestrator,
            config,
            health: HealthRegistry::new(),
            stats: Arc::new(SchedulerStats::default()),
            metrics: ProbeMetrics::new(),
            logger: StructuredLogger::new("netprobe"),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Shared counters, readable while the scheduler runs
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            run_on_startup = self.config.run_on_startup,
            "Starting probe scheduler"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        let first = if self.config.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + self.config.interval
        };
        let mut ticker = interval_at(first, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<AbortHandle> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = match self.orchestrator.try_start() {
                        Ok(cycle) => cycle,
                        Err(_) => {
                            self.stats.ticks_skipped.fetch_add(1, Ordering::SeqCst);
                            self.metrics.inc_skipped_ticks();
                            self.logger.log_cycle_skipped(self.config.interval.as_secs());
                            continue;
                        }
                    };

                    self.stats.cycles_started.fetch_add(1, Ordering::SeqCst);
                    in_flight = Some(cycle.abort_handle());
                    tokio::spawn(async move {
                        match cycle.await {
                            Ok(Ok(report)) => {
                                debug!(cycle_id = report.cycle_id, "Scheduled cycle finished");
                            }
                            Ok(Err(e)) => {
                                warn!(error = %e, "Scheduled probe cycle failed");
                            }
                            Err(e) if e.is_cancelled() => {}
                            Err(e) => {
                                warn!(error = %e, "Scheduled probe cycle panicked");
                            }
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("Shutting down probe scheduler");
                    break;
                }
            }
        }

        if let Some(handle) = in_flight {
            if self.orchestrator.is_running() {
                // Nothing from an unfinished cycle has been committed yet
                warn!("Abandoning in-flight probe cycle");
            }
            handle.abort();
        }
        self.health
            .set_unhealthy(components::SCHEDULER, "scheduler stopped")
            .await;
    }
}
