//! Observability infrastructure for the probe agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, probe failures, geolocation cache, storage)
//! - Structured JSON logging with tracing

use crate::error::FailureKind;
use crate::models::{CycleReport, TestKind};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProbeMetricsInner> = OnceLock::new();

struct ProbeMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_failures: IntCounter,
    skipped_ticks: IntCounter,
    targets_last_cycle: IntGauge,
    probe_failures: IntCounterVec,
    geo_cache_hits: IntCounter,
    geo_cache_misses: IntCounter,
    geo_cache_fallbacks: IntCounter,
    geo_lookup_failures: IntCounter,
    storage_errors: IntCounter,
}

impl ProbeMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "netprobe_cycle_duration_seconds",
                "Wall clock time of a full probe cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_total: register_int_counter!(
                "netprobe_cycles_total",
                "Number of probe cycles run"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures: register_int_counter!(
                "netprobe_cycle_failures_total",
                "Number of probe cycles that could not load targets or commit"
            )
            .expect("Failed to register cycle_failures"),

            skipped_ticks: register_int_counter!(
                "netprobe_skipped_ticks_total",
                "Scheduler ticks skipped because a cycle was still running"
            )
            .expect("Failed to register skipped_ticks"),

            targets_last_cycle: register_int_gauge!(
                "netprobe_targets_last_cycle",
                "Number of targets probed in the most recent cycle"
            )
            .expect("Failed to register targets_last_cycle"),

            probe_failures: register_int_counter_vec!(
                "netprobe_probe_failures_total",
                "Probe tasks that produced a failure row",
                &["test", "kind"]
            )
            .expect("Failed to register probe_failures"),

            geo_cache_hits: register_int_counter!(
                "netprobe_geo_cache_hits_total",
                "Location cache hits"
            )
            .expect("Failed to register geo_cache_hits"),

            geo_cache_misses: register_int_counter!(
                "netprobe_geo_cache_misses_total",
                "Location cache misses"
            )
            .expect("Failed to register geo_cache_misses"),

            geo_cache_fallbacks: register_int_counter!(
                "netprobe_geo_cache_fallbacks_total",
                "Lookups served without the cache because the store was unavailable"
            )
            .expect("Failed to register geo_cache_fallbacks"),

            geo_lookup_failures: register_int_counter!(
                "netprobe_geo_lookup_failures_total",
                "Geolocation requests that failed or returned no data"
            )
            .expect("Failed to register geo_lookup_failures"),

            storage_errors: register_int_counter!(
                "netprobe_storage_errors_total",
                "Failed outcome batch commits"
            )
            .expect("Failed to register storage_errors"),
        }
    }
}

/// Probe metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProbeMetrics {
    _private: (),
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProbeMetricsInner {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new)
    }

    /// Record a finished cycle
    pub fn observe_cycle(&self, duration_secs: f64, targets: usize) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
        self.inner().cycles_total.inc();
        self.inner().targets_last_cycle.set(targets as i64);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }

    pub fn inc_skipped_ticks(&self) {
        self.inner().skipped_ticks.inc();
    }

    pub fn inc_probe_failures(&self, test: TestKind, kind: FailureKind) {
        self.inner()
            .probe_failures
            .with_label_values(&[test.as_str(), kind.as_str()])
            .inc();
    }

    pub fn inc_geo_cache_hits(&self) {
        self.inner().geo_cache_hits.inc();
    }

    pub fn inc_geo_cache_misses(&self) {
        self.inner().geo_cache_misses.inc();
    }

    pub fn inc_geo_cache_fallbacks(&self) {
        self.inner().geo_cache_fallbacks.inc();
    }

    pub fn inc_geo_lookup_failures(&self) {
        self.inner().geo_lookup_failures.inc();
    }

    pub fn inc_storage_errors(&self) {
        self.inner().storage_errors.inc();
    }

    /// Total ticks skipped so far in this process
    pub fn skipped_ticks(&self) -> u64 {
        self.inner().skipped_ticks.get()
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for cycles, probe failures,
/// and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    agent_name: String,
}

impl StructuredLogger {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, targets_source: &str) {
        info!(
            event = "agent_started",
            agent = %self.agent_name,
            agent_version = %version,
            targets_source = %targets_source,
            "Probe agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            agent = %self.agent_name,
            reason = %reason,
            "Probe agent shutting down"
        );
    }

    pub fn log_cycle_complete(&self, report: &CycleReport) {
        let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();
        info!(
            event = "cycle_completed",
            agent = %self.agent_name,
            cycle_id = report.cycle_id,
            targets = report.targets,
            ping_rows = report.ping_rows,
            traceroute_rows = report.traceroute_rows,
            failed_tasks = report.failed_tasks,
            committed = report.committed,
            elapsed_ms = elapsed_ms,
            "Probe cycle complete"
        );
    }

    pub fn log_cycle_skipped(&self, interval_secs: u64) {
        warn!(
            event = "cycle_skipped",
            agent = %self.agent_name,
            interval_secs = interval_secs,
            "Previous probe cycle still running, skipping tick"
        );
    }

    pub fn log_probe_failure(
        &self,
        target_id: i64,
        hostname: &str,
        test: TestKind,
        kind: FailureKind,
        message: &str,
    ) {
        warn!(
            event = "probe_failed",
            agent = %self.agent_name,
            target_id = target_id,
            hostname = %hostname,
            test = %test,
            kind = %kind,
            message = %message,
            "Probe failed, recording failure row"
        );
    }

    pub fn log_storage_error(&self, cycle_id: u64, rows: usize, error: &str) {
        warn!(
            event = "storage_failed",
            agent = %self.agent_name,
            cycle_id = cycle_id,
            rows = rows,
            error = %error,
            "Failed to persist probe cycle outcomes"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_metrics_creation() {
        let metrics = ProbeMetrics::new();

        metrics.observe_cycle(12.5, 3);
        metrics.inc_probe_failures(TestKind::Ping, FailureKind::Timeout);
        metrics.inc_geo_cache_hits();
        metrics.inc_geo_cache_misses();
        metrics.inc_storage_errors();

        let before = metrics.skipped_ticks();
        metrics.inc_skipped_ticks();
        assert!(metrics.skipped_ticks() > before);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("netprobe-test");
        assert_eq!(logger.agent_name, "netprobe-test");
    }
}
