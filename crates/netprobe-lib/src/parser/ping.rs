//! ping output parsing
//!
//! Handles the summary lines printed by iputils and BSD ping:
//! - `4 packets transmitted, 4 received, 0% packet loss, time 3004ms`
//! - `4 packets transmitted, 4 packets received, 0.0% packet loss`
//! - `rtt min/avg/max/mdev = 10.1/12.3/15.0/1.2 ms`
//! - `round-trip min/avg/max/stddev = 10.1/12.3/15.0/1.2 ms`

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Summary statistics extracted from ping output
///
/// Packet counts default to 0 when the summary line is missing; everything
/// else stays `None` unless it was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingStats {
    pub packets_transmitted: u32,
    pub packets_received: u32,
    pub packet_loss_percent: Option<f64>,
    /// `"<n> ms"`
    pub min_rtt: Option<String>,
    /// `"<n> ms"`
    pub avg_rtt: Option<String>,
    /// `"<n> ms"`
    pub max_rtt: Option<String>,
}

fn packet_loss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("valid packet loss regex"))
}

fn packet_counts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received")
            .expect("valid packet count regex")
    })
}

fn rtt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+) ms",
        )
        .expect("valid rtt regex")
    })
}

/// Parse ping output into summary statistics
pub fn parse_ping(text: &str) -> PingStats {
    let mut stats = PingStats::default();

    if let Some(caps) = packet_loss_re().captures(text) {
        stats.packet_loss_percent = caps[1].parse().ok();
    }

    if let Some(caps) = packet_counts_re().captures(text) {
        stats.packets_transmitted = caps[1].parse().unwrap_or(0);
        stats.packets_received = caps[2].parse().unwrap_or(0);
    }

    if let Some(caps) = rtt_re().captures(text) {
        stats.min_rtt = Some(format!("{} ms", &caps[1]));
        stats.avg_rtt = Some(format!("{} ms", &caps[2]));
        stats.max_rtt = Some(format!("{} ms", &caps[3]));
    }

    stats
}
