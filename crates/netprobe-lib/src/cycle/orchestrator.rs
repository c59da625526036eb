//! Probe cycle orchestration
//!
//! One cycle takes a snapshot of the targets, queues a ping and a traceroute
//! task per target onto a bounded queue drained by a fixed set of workers,
//! waits for every worker, then commits all rows as a single batch.

use crate::error::{CycleError, ProbeFailure};
use crate::geo::{is_private_ip, LocationCache};
use crate::health::{components, HealthRegistry};
use crate::models::{
    CycleReport, DisplayLocation, Hop, PingOutcome, ProbeOutcome, Target, TestKind,
    TracerouteOutcome,
};
use crate::observability::{ProbeMetrics, StructuredLogger};
use crate::parser::{parse_millis, parse_ping, parse_traceroute};
use crate::runner::{ProbeRunner, DEFAULT_PING_COUNT, DEFAULT_TRACEROUTE_TIMEOUT};
use crate::store::{OutcomeStore, TargetRepository};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Configuration for a probe cycle
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Number of worker tasks running probes (default: 10)
    pub worker_pool_size: usize,
    /// Echo requests per ping (default: 4)
    pub ping_count: u32,
    /// Hard limit for each traceroute (default: 60 seconds)
    pub traceroute_timeout: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            ping_count: DEFAULT_PING_COUNT,
            traceroute_timeout: DEFAULT_TRACEROUTE_TIMEOUT,
        }
    }
}

/// Where the most recent cycle ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
    Committed,
    Failed,
}

/// One unit of work for the pool
#[derive(Debug, Clone)]
struct ProbeTask {
    target: Target,
    kind: TestKind,
}

/// Result of a task as it crosses the join barrier
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Completed(ProbeOutcome),
    Failed {
        target: Target,
        kind: TestKind,
        timestamp: DateTime<Utc>,
        failure: ProbeFailure,
    },
}

/// Everything a worker needs to execute tasks
#[derive(Clone)]
struct TaskContext {
    runner: Arc<dyn ProbeRunner>,
    locations: LocationCache,
    ping_count: u32,
    traceroute_timeout: Duration,
}

impl TaskContext {
    /// Run a task; panics are caught here and never leave the task
    async fn execute(&self, task: ProbeTask) -> TaskOutcome {
        let timestamp = Utc::now();

        let result = AssertUnwindSafe(self.run(&task, timestamp))
            .catch_unwind()
            .await;

        match result {
            Ok(outcome) => outcome,
            Err(panic) => TaskOutcome::Failed {
                target: task.target,
                kind: task.kind,
                timestamp,
                failure: ProbeFailure::unknown(format!(
                    "probe task panicked: {}",
                    panic_message(panic.as_ref())
                )),
            },
        }
    }

    async fn run(&self, task: &ProbeTask, timestamp: DateTime<Utc>) -> TaskOutcome {
        let target = &task.target;

        let result = match task.kind {
            TestKind::Ping => self
                .runner
                .run_ping(&target.hostname, self.ping_count)
                .await
                .map(|raw| {
                    ProbeOutcome::Ping(build_ping_outcome(target.id, timestamp, raw.stdout))
                }),
            TestKind::Traceroute => {
                match self
                    .runner
                    .run_traceroute(&target.hostname, self.traceroute_timeout)
                    .await
                {
                    Ok(raw) => {
                        let mut hops = parse_traceroute(&raw.stdout);
                        self.enrich(&mut hops).await;
                        Ok(ProbeOutcome::Traceroute(TracerouteOutcome {
                            target_id: target.id,
                            timestamp,
                            raw_output: raw.stdout,
                            hops,
                        }))
                    }
                    Err(failure) => Err(failure),
                }
            }
        };

        match result {
            Ok(outcome) => TaskOutcome::Completed(outcome),
            Err(failure) => TaskOutcome::Failed {
                target: target.clone(),
                kind: task.kind,
                timestamp,
                failure,
            },
        }
    }

    /// Attach locations to every probe with a usable address
    async fn enrich(&self, hops: &mut [Hop]) {
        for probe in hops.iter_mut().flat_map(|hop| hop.details.iter_mut()) {
            if !probe.has_address() {
                continue;
            }
            if is_private_ip(&probe.ip) {
                probe.display_location = Some(DisplayLocation::PrivateNetwork);
                continue;
            }
            match self.locations.get_or_fetch(&probe.ip).await {
                Some(location) => probe.location = Some(location),
                None => probe.display_location = Some(DisplayLocation::Unknown),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Turn raw ping output into an outcome row
pub fn build_ping_outcome(target_id: i64, timestamp: DateTime<Utc>, raw_output: String) -> PingOutcome {
    let stats = parse_ping(&raw_output);
    PingOutcome {
        target_id,
        timestamp,
        packets_transmitted: Some(stats.packets_transmitted),
        packets_received: Some(stats.packets_received),
        packet_loss_percent: stats.packet_loss_percent,
        min_rtt_ms: stats.min_rtt.as_deref().and_then(parse_millis),
        avg_rtt_ms: stats.avg_rtt.as_deref().and_then(parse_millis),
        max_rtt_ms: stats.max_rtt.as_deref().and_then(parse_millis),
        raw_output,
    }
}

/// Row recorded in place of a failed task
fn failure_row(
    target_id: i64,
    kind: TestKind,
    timestamp: DateTime<Utc>,
    failure: &ProbeFailure,
) -> ProbeOutcome {
    let message = format!("{} failed ({}): {}", kind, failure.kind, failure.message);
    match kind {
        TestKind::Ping => ProbeOutcome::Ping(PingOutcome::failed(target_id, timestamp, message)),
        TestKind::Traceroute => {
            ProbeOutcome::Traceroute(TracerouteOutcome::failed(target_id, timestamp, message))
        }
    }
}

/// Runs probe cycles against the current target list
pub struct ProbeCycleOrchestrator {
    context: TaskContext,
    targets: Arc<dyn TargetRepository>,
    outcomes: Arc<dyn OutcomeStore>,
    config: CycleConfig,
    health: HealthRegistry,
    metrics: ProbeMetrics,
    logger: StructuredLogger,
    /// Held for the whole cycle; rejects overlapping runs
    running: Arc<Mutex<()>>,
    state: RwLock<CycleState>,
    last_report: RwLock<Option<CycleReport>>,
    cycle_counter: AtomicU64,
}

impl ProbeCycleOrchestrator {
    pub fn builder() -> ProbeCycleBuilder {
        ProbeCycleBuilder::new()
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Whether a cycle is in progress right now
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn state(&self) -> CycleState {
        *self.state.read().await
    }

    /// Report of the most recently finished cycle
    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Run one full cycle now
    ///
    /// Fails with [`CycleError::AlreadyRunning`] instead of waiting when
    /// another cycle holds the pool.
    pub async fn run_cycle_now(&self) -> Result<CycleReport, CycleError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| CycleError::AlreadyRunning)?;
        self.run_locked().await
    }

    /// Claim the pool now and run one cycle on a background task
    ///
    /// The claim is taken before this returns, so `Ok` means the cycle
    /// will run and [`is_running`](Self::is_running) already reports it.
    pub fn try_start(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<CycleReport, CycleError>>, CycleError> {
        let guard = Arc::clone(&self.running)
            .try_lock_owned()
            .map_err(|_| CycleError::AlreadyRunning)?;
        let orchestrator = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run_locked().await
        }))
    }

    /// Body of a cycle; the caller holds `running`
    async fn run_locked(&self) -> Result<CycleReport, CycleError> {
        *self.state.write().await = CycleState::Running;
        let cycle_id = self.cycle_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let start = Instant::now();

        let targets = match self.targets.list_all_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(cycle_id = cycle_id, error = %e, "Failed to load targets, abandoning cycle");
                self.metrics.inc_cycle_failures();
                *self.state.write().await = CycleState::Failed;
                return Err(CycleError::Targets(e));
            }
        };

        info!(cycle_id = cycle_id, targets = targets.len(), "Starting probe cycle");

        let results = self.execute_all(&targets).await;

        let mut rows = Vec::with_capacity(results.len());
        let mut failed_tasks = 0;
        for result in results {
            match result {
                TaskOutcome::Completed(row) => rows.push(row),
                TaskOutcome::Failed {
                    target,
                    kind,
                    timestamp,
                    failure,
                } => {
                    failed_tasks += 1;
                    self.metrics.inc_probe_failures(kind, failure.kind);
                    self.logger.log_probe_failure(
                        target.id,
                        &target.hostname,
                        kind,
                        failure.kind,
                        &failure.message,
                    );
                    rows.push(failure_row(target.id, kind, timestamp, &failure));
                }
            }
        }

        if failed_tasks == rows.len() && !rows.is_empty() {
            self.health
                .set_degraded(components::PROBE_RUNNER, "every probe in the last cycle failed")
                .await;
        } else {
            self.health.set_healthy(components::PROBE_RUNNER).await;
        }

        let ping_rows = rows.iter().filter(|r| r.kind() == TestKind::Ping).count();
        let traceroute_rows = rows.len() - ping_rows;
        let row_count = rows.len();

        let commit = if rows.is_empty() {
            Ok(())
        } else {
            self.outcomes.save_batch(rows).await
        };

        let expired = self.context.locations.purge_expired().await;
        if expired > 0 {
            debug!(cycle_id = cycle_id, expired = expired, "Purged expired locations");
        }

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            targets: targets.len(),
            ping_rows,
            traceroute_rows,
            failed_tasks,
            committed: commit.is_ok(),
        };
        self.metrics
            .observe_cycle(start.elapsed().as_secs_f64(), targets.len());
        *self.last_report.write().await = Some(report.clone());

        match commit {
            Ok(()) => {
                self.health.set_healthy(components::OUTCOME_STORE).await;
                *self.state.write().await = CycleState::Committed;
                self.logger.log_cycle_complete(&report);
                Ok(report)
            }
            Err(e) => {
                self.metrics.inc_storage_errors();
                self.metrics.inc_cycle_failures();
                self.logger
                    .log_storage_error(cycle_id, row_count, &e.to_string());
                self.health
                    .set_degraded(components::OUTCOME_STORE, e.to_string())
                    .await;
                *self.state.write().await = CycleState::Failed;
                Err(CycleError::Storage(e))
            }
        }
    }

    /// Fan tasks out over the worker pool and collect every result
    async fn execute_all(&self, targets: &[Target]) -> Vec<TaskOutcome> {
        let pool_size = self.config.worker_pool_size.max(1);
        let (task_tx, task_rx) = mpsc::channel::<ProbeTask>(pool_size * 2);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<TaskOutcome>();

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let context = self.context.clone();

            workers.spawn(async move {
                loop {
                    let next = task_rx.lock().await.recv().await;
                    let Some(task) = next else {
                        break;
                    };
                    debug!(
                        worker_id = worker_id,
                        target_id = task.target.id,
                        test = %task.kind,
                        "Running probe task"
                    );
                    if result_tx.send(context.execute(task).await).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        'queue: for target in targets {
            for kind in [TestKind::Ping, TestKind::Traceroute] {
                let task = ProbeTask {
                    target: target.clone(),
                    kind,
                };
                if task_tx.send(task).await.is_err() {
                    warn!("All probe workers exited, abandoning remaining tasks");
                    break 'queue;
                }
            }
        }
        drop(task_tx);

        // Join barrier: nothing is committed until every worker is done
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Probe worker exited abnormally");
            }
        }

        let mut results = Vec::with_capacity(targets.len() * 2);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        results
    }
}

/// Builder for a probe cycle orchestrator
pub struct ProbeCycleBuilder {
    runner: Option<Arc<dyn ProbeRunner>>,
    locations: Option<LocationCache>,
    targets: Option<Arc<dyn TargetRepository>>,
    outcomes: Option<Arc<dyn OutcomeStore>>,
    config: CycleConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ProbeCycleBuilder {
    pub fn new() -> Self {
        Self {
            runner: None,
            locations: None,
            targets: None,
            outcomes: None,
            config: CycleConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn runner(mut self, runner: Arc<dyn ProbeRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn locations(mut self, locations: LocationCache) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn targets(mut self, targets: Arc<dyn TargetRepository>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn outcomes(mut self, outcomes: Arc<dyn OutcomeStore>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn config(mut self, config: CycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<ProbeCycleOrchestrator> {
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("Probe runner is required"))?;
        let locations = self
            .locations
            .ok_or_else(|| anyhow::anyhow!("Location cache is required"))?;
        let targets = self
            .targets
            .ok_or_else(|| anyhow::anyhow!("Target repository is required"))?;
        let outcomes = self
            .outcomes
            .ok_or_else(|| anyhow::anyhow!("Outcome store is required"))?;

        if self.config.worker_pool_size == 0 {
            anyhow::bail!("Worker pool size must be at least 1");
        }

        Ok(ProbeCycleOrchestrator {
            context: TaskContext {
                runner,
                locations,
                ping_count: self.config.ping_count,
                traceroute_timeout: self.config.traceroute_timeout,
            },
            targets,
            outcomes,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: ProbeMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("netprobe")),
            running: Arc::new(Mutex::new(())),
            state: RwLock::new(CycleState::Idle),
            last_report: RwLock::new(None),
            cycle_counter: AtomicU64::new(0),
        })
    }
}

impl Default for ProbeCycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
