//! Probe runner backed by the host's ping and traceroute binaries

use super::{ProbeRunner, RawOutput, RawResult, DEFAULT_PING_TIMEOUT};
use crate::error::{FailureKind, ProbeFailure};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

pub const PING_PROGRAM: &str = "ping";
pub const TRACEROUTE_PROGRAM: &str = "traceroute";

/// Runs probes as child processes
#[derive(Debug, Clone)]
pub struct SystemProbeRunner {
    ping_program: String,
    traceroute_program: String,
    /// `None` leaves ping bounded only by the OS defaults
    ping_timeout: Option<Duration>,
}

impl Default for SystemProbeRunner {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PING_TIMEOUT))
    }
}

impl SystemProbeRunner {
    pub fn new(ping_timeout: Option<Duration>) -> Self {
        Self {
            ping_program: PING_PROGRAM.to_string(),
            traceroute_program: TRACEROUTE_PROGRAM.to_string(),
            ping_timeout,
        }
    }

    /// Use different executables (for testing or non-standard installs)
    pub fn with_programs(
        ping_program: impl Into<String>,
        traceroute_program: impl Into<String>,
        ping_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ping_program: ping_program.into(),
            traceroute_program: traceroute_program.into(),
            ping_timeout,
        }
    }

    pub fn ping_timeout(&self) -> Option<Duration> {
        self.ping_timeout
    }
}

#[async_trait]
impl ProbeRunner for SystemProbeRunner {
    async fn run_ping(&self, hostname: &str, count: u32) -> RawResult {
        let count = count.max(1).to_string();
        execute(
            &self.ping_program,
            &["-c", &count, hostname],
            self.ping_timeout,
        )
        .await
    }

    async fn run_traceroute(&self, hostname: &str, timeout: Duration) -> RawResult {
        execute(&self.traceroute_program, &["-n", hostname], Some(timeout)).await
    }
}

/// Run a program to completion, capturing its output
async fn execute(program: &str, args: &[&str], deadline: Option<Duration>) -> RawResult {
    let start = Instant::now();
    debug!(program = %program, args = ?args, "Executing probe");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => ProbeFailure::tool_missing(program),
        _ => ProbeFailure::unknown(format!("failed to spawn {}: {}", program, e)),
    })?;

    // Dropping the future on timeout drops the child, which kills it
    let output = match deadline {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => return Err(ProbeFailure::timeout(program, limit)),
        },
        None => child.wait_with_output().await,
    }
    .map_err(|e| ProbeFailure::unknown(format!("{} failed: {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!(
        program = %program,
        exit_code = ?output.status.code(),
        elapsed_ms = start.elapsed().as_millis(),
        "Probe finished"
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{} exited with status {}", program, output.status)
        };
        return Err(ProbeFailure::new(FailureKind::ExecutionFailed, message));
    }

    Ok(RawOutput::new(stdout))
}
