//! Parsing of ping and traceroute command output
//!
//! Everything here is pure: no I/O, no shared state. Parsers are lenient and
//! never fail; unrecognised input yields empty or unset fields.

mod ping;
mod traceroute;

pub use ping::{parse_ping, PingStats};
pub use traceroute::parse_traceroute;

/// Convert an rtt string such as `"12.3 ms"` to milliseconds
pub fn parse_millis(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix("ms").unwrap_or(trimmed).trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}
