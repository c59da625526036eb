//! Core data models for network probing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used for traceroute fields that could not be determined
pub const NOT_AVAILABLE: &str = "N/A";

/// Marker printed by traceroute for a probe that timed out
pub const TIMEOUT_MARKER: &str = "*";

/// A host to be probed each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub hostname: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Kind of probe run against a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Ping,
    Traceroute,
}

impl TestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Ping => "ping",
            TestKind::Traceroute => "traceroute",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one ping run against a target
///
/// `raw_output` is always set. When the probe fails it carries the failure
/// message and every structured field is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingOutcome {
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub raw_output: String,
    pub packets_transmitted: Option<u32>,
    pub packets_received: Option<u32>,
    pub packet_loss_percent: Option<f64>,
    pub min_rtt_ms: Option<f64>,
    pub avg_rtt_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
}

impl PingOutcome {
    /// Outcome row for a ping that could not be run or did not complete
    pub fn failed(target_id: i64, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            target_id,
            timestamp,
            raw_output: message.into(),
            packets_transmitted: None,
            packets_received: None,
            packet_loss_percent: None,
            min_rtt_ms: None,
            avg_rtt_ms: None,
            max_rtt_ms: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.packets_transmitted.is_none()
    }
}

/// Result of one traceroute run against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteOutcome {
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub raw_output: String,
    pub hops: Vec<Hop>,
}

impl TracerouteOutcome {
    /// Outcome row for a traceroute that could not be run or did not complete
    pub fn failed(target_id: i64, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            target_id,
            timestamp,
            raw_output: message.into(),
            hops: Vec::new(),
        }
    }
}

/// One router position along a traceroute path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    /// 1-based; may repeat when the output is ambiguous
    pub hop_number: u32,
    pub details: Vec<Probe>,
}

/// One latency sample for a hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub host: String,
    pub ip: String,
    pub rtt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_location: Option<DisplayLocation>,
}

impl Probe {
    pub fn new(host: impl Into<String>, ip: impl Into<String>, rtt: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ip: ip.into(),
            rtt: rtt.into(),
            location: None,
            display_location: None,
        }
    }

    /// A probe that got no reply (`*` in traceroute output)
    pub fn timed_out() -> Self {
        Self::new(TIMEOUT_MARKER, NOT_AVAILABLE, NOT_AVAILABLE)
    }

    /// Whether the probe carries an address worth geolocating
    pub fn has_address(&self) -> bool {
        self.ip != NOT_AVAILABLE && self.ip != TIMEOUT_MARKER
    }
}

/// Geographic position of an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

/// Display hint for probes without a resolved location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayLocation {
    PrivateNetwork,
    Unknown,
}

/// A single persisted row produced by a probe cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Ping(PingOutcome),
    Traceroute(TracerouteOutcome),
}

impl ProbeOutcome {
    pub fn target_id(&self) -> i64 {
        match self {
            ProbeOutcome::Ping(p) => p.target_id,
            ProbeOutcome::Traceroute(t) => t.target_id,
        }
    }

    pub fn kind(&self) -> TestKind {
        match self {
            ProbeOutcome::Ping(_) => TestKind::Ping,
            ProbeOutcome::Traceroute(_) => TestKind::Traceroute,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProbeOutcome::Ping(p) => p.timestamp,
            ProbeOutcome::Traceroute(t) => t.timestamp,
        }
    }

    pub fn raw_output(&self) -> &str {
        match self {
            ProbeOutcome::Ping(p) => &p.raw_output,
            ProbeOutcome::Traceroute(t) => &t.raw_output,
        }
    }
}

/// Summary of one probe cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: usize,
    pub ping_rows: usize,
    pub traceroute_rows: usize,
    pub failed_tasks: usize,
    pub committed: bool,
}
