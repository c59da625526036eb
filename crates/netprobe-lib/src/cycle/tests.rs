use super::*;
use crate::error::{CycleError, FailureKind, ProbeFailure, StorageError};
use crate::geo::{GeoResolver, LocationCache, MemoryCacheStore, DEFAULT_CACHE_TTL};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{
    DisplayLocation, Location, PingOutcome, ProbeOutcome, Target, TracerouteOutcome,
    NOT_AVAILABLE,
};
use crate::runner::{ProbeRunner, RawOutput, RawResult};
use crate::store::{MemoryOutcomeStore, OutcomeStore, TargetRegistry, TargetRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PING_OK: &str = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.

--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3005ms
rtt min/avg/max/mdev = 11.456/12.325/13.512/0.789 ms
";

const TRACE_OK: &str = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets
 1  192.168.1.1  1.234 ms
 2  8.8.8.8  10.5 ms
";

/// What a scripted probe does for one hostname
#[derive(Clone)]
enum Script {
    Output(&'static str),
    Fail(ProbeFailure),
    Panic,
}

/// Runner answering from per-hostname scripts and tracking concurrency
struct ScriptedRunner {
    ping: HashMap<String, Script>,
    traceroute: HashMap<String, Script>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self {
            ping: HashMap::new(),
            traceroute: HashMap::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn ping(mut self, hostname: &str, script: Script) -> Self {
        self.ping.insert(hostname.to_string(), script);
        self
    }

    fn traceroute(mut self, hostname: &str, script: Script) -> Self {
        self.traceroute.insert(hostname.to_string(), script);
        self
    }

    async fn play(&self, script: Option<Script>, default: &'static str) -> RawResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match script.unwrap_or(Script::Output(default)) {
            Script::Output(out) => Ok(RawOutput::new(out)),
            Script::Fail(failure) => Err(failure),
            Script::Panic => panic!("scripted probe panic"),
        }
    }
}

#[async_trait]
impl ProbeRunner for ScriptedRunner {
    async fn run_ping(&self, hostname: &str, _count: u32) -> RawResult {
        self.play(self.ping.get(hostname).cloned(), PING_OK).await
    }

    async fn run_traceroute(&self, hostname: &str, _timeout: Duration) -> RawResult {
        self.play(self.traceroute.get(hostname).cloned(), TRACE_OK).await
    }
}

/// Resolver knowing a single public address
struct MockResolver {
    calls: AtomicUsize,
}

#[async_trait]
impl GeoResolver for MockResolver {
    async fn resolve(&self, ip: &str) -> Option<Location> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (ip == "8.8.8.8").then(|| Location {
            country: "United States".to_string(),
            city: "Mountain View".to_string(),
            lat: 37.386,
            lon: -122.0838,
        })
    }
}

/// Store whose commits always fail
struct BrokenStore;

#[async_trait]
impl OutcomeStore for BrokenStore {
    async fn save_batch(&self, _outcomes: Vec<ProbeOutcome>) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }

    async fn ping_outcomes(
        &self,
        _target_id: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<PingOutcome>, StorageError> {
        Ok(Vec::new())
    }

    async fn traceroute_outcomes(
        &self,
        _target_id: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<TracerouteOutcome>, StorageError> {
        Ok(Vec::new())
    }
}

struct BrokenTargets;

#[async_trait]
impl TargetRepository for BrokenTargets {
    async fn list_all_targets(&self) -> Result<Vec<Target>, StorageError> {
        Err(StorageError::Unavailable("database offline".to_string()))
    }
}

fn target(id: i64, hostname: &str) -> Target {
    Target {
        id,
        hostname: hostname.to_string(),
        description: None,
    }
}

struct Fixture {
    orchestrator: Arc<ProbeCycleOrchestrator>,
    runner: Arc<ScriptedRunner>,
    resolver: Arc<MockResolver>,
    outcomes: Arc<MemoryOutcomeStore>,
    registry: Arc<TargetRegistry>,
    health: HealthRegistry,
}

fn fixture(runner: ScriptedRunner, targets: Vec<Target>, pool: usize) -> Fixture {
    let runner = Arc::new(runner);
    let resolver = Arc::new(MockResolver {
        calls: AtomicUsize::new(0),
    });
    let outcomes = Arc::new(MemoryOutcomeStore::new());
    let registry = Arc::new(TargetRegistry::from_targets(targets));
    let health = HealthRegistry::new();

    let locations = LocationCache::new(
        Arc::new(MemoryCacheStore::new()),
        resolver.clone(),
        DEFAULT_CACHE_TTL,
    );
    let orchestrator = ProbeCycleOrchestrator::builder()
        .runner(runner.clone())
        .locations(locations)
        .targets(registry.clone())
        .outcomes(outcomes.clone())
        .worker_pool_size(pool)
        .health(health.clone())
        .build()
        .unwrap();

    Fixture {
        orchestrator: Arc::new(orchestrator),
        runner,
        resolver,
        outcomes,
        registry,
        health,
    }
}

fn pings(rows: &[ProbeOutcome]) -> Vec<&PingOutcome> {
    rows.iter()
        .filter_map(|row| match row {
            ProbeOutcome::Ping(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn traces(rows: &[ProbeOutcome]) -> Vec<&TracerouteOutcome> {
    rows.iter()
        .filter_map(|row| match row {
            ProbeOutcome::Traceroute(t) => Some(t),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_failed_ping_still_yields_a_row_per_task() {
    let runner = ScriptedRunner::new().ping(
        "b.example",
        Script::Fail(ProbeFailure::new(
            FailureKind::ExecutionFailed,
            "ping: unknown host b.example",
        )),
    );
    let f = fixture(
        runner,
        vec![target(1, "a.example"), target(2, "b.example"), target(3, "c.example")],
        10,
    );

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.targets, 3);
    assert_eq!(report.ping_rows, 3);
    assert_eq!(report.traceroute_rows, 3);
    assert_eq!(report.failed_tasks, 1);
    assert!(report.committed);

    let rows = f.outcomes.all().await;
    assert_eq!(rows.len(), 6);

    let failed: Vec<_> = pings(&rows).into_iter().filter(|p| p.is_failure()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target_id, 2);
    assert!(failed[0].raw_output.contains("ping: unknown host b.example"));
    assert!(failed[0].packets_transmitted.is_none());
    assert!(failed[0].avg_rtt_ms.is_none());

    assert_eq!(f.orchestrator.state().await, CycleState::Committed);
    assert_eq!(f.orchestrator.last_report().await, Some(report));
}

#[tokio::test]
async fn test_ping_statistics_are_stored_as_numbers() {
    let f = fixture(ScriptedRunner::new(), vec![target(1, "8.8.8.8")], 2);
    f.orchestrator.run_cycle_now().await.unwrap();

    let rows = f.outcomes.all().await;
    let ping = pings(&rows)[0];
    assert_eq!(ping.packets_transmitted, Some(4));
    assert_eq!(ping.packets_received, Some(4));
    assert_eq!(ping.packet_loss_percent, Some(0.0));
    assert_eq!(ping.min_rtt_ms, Some(11.456));
    assert_eq!(ping.avg_rtt_ms, Some(12.325));
    assert_eq!(ping.max_rtt_ms, Some(13.512));
    assert_eq!(ping.raw_output, PING_OK);
}

#[tokio::test]
async fn test_traceroute_hops_are_enriched_with_locations() {
    let f = fixture(ScriptedRunner::new(), vec![target(1, "8.8.8.8")], 2);
    f.orchestrator.run_cycle_now().await.unwrap();

    let rows = f.outcomes.all().await;
    let trace = traces(&rows)[0];
    assert_eq!(trace.hops.len(), 2);

    let private_hop = &trace.hops[0].details[0];
    assert_eq!(private_hop.ip, "192.168.1.1");
    assert_eq!(private_hop.rtt, "1.234 ms");
    assert!(private_hop.location.is_none());
    assert_eq!(
        private_hop.display_location,
        Some(DisplayLocation::PrivateNetwork)
    );

    let public_hop = &trace.hops[1].details[0];
    let location = public_hop.location.as_ref().unwrap();
    assert_eq!(location.city, "Mountain View");
    assert!(public_hop.display_location.is_none());

    // Only the public address reached the resolver
    assert_eq!(f.resolver.calls.load(Ordering::SeqCst), 1);

    // The second cycle is served from the cache
    f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(f.resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unresolved_public_hop_is_marked_unknown() {
    let runner = ScriptedRunner::new().traceroute(
        "example.com",
        Script::Output(" 1  93.184.216.34  20.1 ms\n 2  * * *\n"),
    );
    let f = fixture(runner, vec![target(7, "example.com")], 2);
    f.orchestrator.run_cycle_now().await.unwrap();

    let rows = f.outcomes.all().await;
    let trace = traces(&rows)[0];
    let hop = &trace.hops[0].details[0];
    assert!(hop.location.is_none());
    assert_eq!(hop.display_location, Some(DisplayLocation::Unknown));

    let timed_out = &trace.hops[1].details[0];
    assert_eq!(timed_out.ip, NOT_AVAILABLE);
    assert!(timed_out.display_location.is_none());
}

#[tokio::test]
async fn test_traceroute_timeout_records_failure_row() {
    let runner = ScriptedRunner::new().traceroute(
        "slow.example",
        Script::Fail(ProbeFailure::timeout("traceroute", Duration::from_secs(60))),
    );
    let f = fixture(runner, vec![target(1, "slow.example")], 2);

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.failed_tasks, 1);

    let rows = f.outcomes.all().await;
    let trace = traces(&rows)[0];
    assert!(trace.hops.is_empty());
    assert!(trace.raw_output.contains("timed out after 60s"));
    assert!(trace.raw_output.contains("timeout"));
}

#[tokio::test]
async fn test_panicking_probe_is_isolated() {
    let runner = ScriptedRunner::new().ping("boom.example", Script::Panic);
    let f = fixture(
        runner,
        vec![target(1, "boom.example"), target(2, "fine.example")],
        1,
    );

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.failed_tasks, 1);

    let rows = f.outcomes.all().await;
    assert_eq!(rows.len(), 4);

    let pings = pings(&rows);
    let boom = pings.iter().find(|p| p.target_id == 1).unwrap();
    assert!(boom.is_failure());
    assert!(boom.raw_output.contains("scripted probe panic"));

    let fine = pings.iter().find(|p| p.target_id == 2).unwrap();
    assert_eq!(fine.avg_rtt_ms, Some(12.325));
}

#[tokio::test]
async fn test_storage_failure_surfaces_and_degrades_health() {
    let runner = Arc::new(ScriptedRunner::new());
    let resolver = Arc::new(MockResolver {
        calls: AtomicUsize::new(0),
    });
    let health = HealthRegistry::new();
    let orchestrator = ProbeCycleOrchestrator::builder()
        .runner(runner)
        .locations(LocationCache::new(
            Arc::new(MemoryCacheStore::new()),
            resolver,
            DEFAULT_CACHE_TTL,
        ))
        .targets(Arc::new(TargetRegistry::from_targets(vec![target(1, "a.example")])))
        .outcomes(Arc::new(BrokenStore))
        .health(health.clone())
        .build()
        .unwrap();

    let result = orchestrator.run_cycle_now().await;
    assert!(matches!(result, Err(CycleError::Storage(StorageError::Unavailable(_)))));

    assert_eq!(orchestrator.state().await, CycleState::Failed);
    assert_eq!(
        health.status_of(components::OUTCOME_STORE).await,
        Some(ComponentStatus::Degraded)
    );

    let report = orchestrator.last_report().await.unwrap();
    assert!(!report.committed);
    assert_eq!(report.ping_rows, 1);
}

#[tokio::test]
async fn test_target_load_failure_aborts_before_probing() {
    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = ProbeCycleOrchestrator::builder()
        .runner(runner.clone())
        .locations(LocationCache::new(
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MockResolver {
                calls: AtomicUsize::new(0),
            }),
            DEFAULT_CACHE_TTL,
        ))
        .targets(Arc::new(BrokenTargets))
        .outcomes(Arc::new(MemoryOutcomeStore::new()))
        .build()
        .unwrap();

    let result = orchestrator.run_cycle_now().await;
    assert!(matches!(result, Err(CycleError::Targets(_))));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    assert!(orchestrator.last_report().await.is_none());
}

#[tokio::test]
async fn test_empty_target_list_commits_nothing() {
    let f = fixture(ScriptedRunner::new(), Vec::new(), 4);

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.targets, 0);
    assert_eq!(report.ping_rows + report.traceroute_rows, 0);
    assert!(report.committed);
    assert!(f.outcomes.is_empty().await);
    assert_eq!(f.runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_run_is_rejected() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_secs(5));
    let f = fixture(runner, vec![target(1, "a.example")], 2);

    let first = {
        let orchestrator = f.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle_now().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(f.orchestrator.is_running());
    assert!(matches!(
        f.orchestrator.run_cycle_now().await,
        Err(CycleError::AlreadyRunning)
    ));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.cycle_id, 1);
    assert!(!f.orchestrator.is_running());
    assert_eq!(f.outcomes.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_try_start_claims_pool_before_returning() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_secs(5));
    let f = fixture(runner, vec![target(1, "a.example")], 2);

    let cycle = f.orchestrator.try_start().unwrap();

    // No yield in between: the claim is visible as soon as try_start returns
    assert!(f.orchestrator.is_running());
    assert!(matches!(
        f.orchestrator.try_start(),
        Err(CycleError::AlreadyRunning)
    ));
    assert!(matches!(
        f.orchestrator.run_cycle_now().await,
        Err(CycleError::AlreadyRunning)
    ));

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.cycle_id, 1);
    assert!(!f.orchestrator.is_running());
    assert_eq!(f.outcomes.len().await, 2);
    assert!(f.orchestrator.try_start().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_bounds_concurrency() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_secs(1));
    let targets = (1..=6).map(|i| target(i, &format!("host{}.example", i))).collect();
    let f = fixture(runner, targets, 2);

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.ping_rows + report.traceroute_rows, 12);
    assert_eq!(f.runner.calls.load(Ordering::SeqCst), 12);
    assert_eq!(f.runner.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_targets_added_mid_cycle_wait_for_next_cycle() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_secs(2));
    let f = fixture(runner, vec![target(1, "a.example")], 4);

    let first = {
        let orchestrator = f.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle_now().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    f.registry.register(target(2, "b.example"));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.targets, 1);
    assert_eq!(f.outcomes.len().await, 2);

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.targets, 2);
    assert_eq!(report.cycle_id, 2);
    assert_eq!(f.outcomes.len().await, 6);
}

#[tokio::test]
async fn test_all_probes_failing_degrades_runner_health() {
    let runner = ScriptedRunner::new()
        .ping("a.example", Script::Fail(ProbeFailure::tool_missing("ping")))
        .traceroute(
            "a.example",
            Script::Fail(ProbeFailure::tool_missing("traceroute")),
        );
    let f = fixture(runner, vec![target(1, "a.example")], 2);

    let report = f.orchestrator.run_cycle_now().await.unwrap();
    assert_eq!(report.failed_tasks, 2);
    assert_eq!(
        f.health.status_of(components::PROBE_RUNNER).await,
        Some(ComponentStatus::Degraded)
    );
    assert_eq!(
        f.health.status_of(components::OUTCOME_STORE).await,
        Some(ComponentStatus::Healthy)
    );
}

#[test]
fn test_builder_requires_components() {
    assert!(ProbeCycleOrchestrator::builder().build().is_err());

    let result = ProbeCycleOrchestrator::builder()
        .runner(Arc::new(ScriptedRunner::new()))
        .locations(LocationCache::new(
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MockResolver {
                calls: AtomicUsize::new(0),
            }),
            DEFAULT_CACHE_TTL,
        ))
        .targets(Arc::new(TargetRegistry::new()))
        .outcomes(Arc::new(MemoryOutcomeStore::new()))
        .worker_pool_size(0)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_cycle_config_defaults() {
    let config = CycleConfig::default();
    assert_eq!(config.worker_pool_size, 10);
    assert_eq!(config.ping_count, 4);
    assert_eq!(config.traceroute_timeout, Duration::from_secs(60));
}

#[test]
fn test_build_ping_outcome_without_statistics() {
    let outcome = build_ping_outcome(1, chrono::Utc::now(), "garbage".to_string());
    assert_eq!(outcome.packets_transmitted, Some(0));
    assert_eq!(outcome.packets_received, Some(0));
    assert!(outcome.avg_rtt_ms.is_none());
    assert!(!outcome.is_failure());
}
