//! Execution of external network probes
//!
//! Runners invoke `ping` and `traceroute` for a single host and hand back
//! either the captured stdout or a typed [`ProbeFailure`]. They never panic
//! and never return an untyped error.

mod system;

pub use system::{SystemProbeRunner, PING_PROGRAM, TRACEROUTE_PROGRAM};

use crate::error::ProbeFailure;
use async_trait::async_trait;
use std::time::Duration;

/// Default number of echo requests per ping
pub const DEFAULT_PING_COUNT: u32 = 4;

/// Default hard limit for a traceroute run
pub const DEFAULT_TRACEROUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default upper bound for a ping run
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured output of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
}

impl RawOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
        }
    }
}

/// Outcome of running one probe program
pub type RawResult = Result<RawOutput, ProbeFailure>;

/// Trait for probe execution implementations
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Send `count` echo requests to `hostname`
    async fn run_ping(&self, hostname: &str, count: u32) -> RawResult;

    /// Trace the route to `hostname` without reverse DNS, bounded by `timeout`
    async fn run_traceroute(&self, hostname: &str, timeout: Duration) -> RawResult;
}
