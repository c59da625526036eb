//! traceroute output parsing
//!
//! Each hop line (`<n>  <tokens...>`) is split on whitespace and fed through
//! a small state machine. The heuristics accept the common layouts:
//! - `1  192.168.1.1  1.234 ms  1.101 ms  0.998 ms` (numeric, `-n`)
//! - `2  router.example (10.0.0.1)  5.1 ms` (name with address)
//! - `3  *  *  *` (no reply, collapsed into one probe)
//!
//! Output from exotic platforms may be misattributed; the parser never fails
//! and always returns whatever hops it could recognise.

use crate::models::{Hop, Probe, NOT_AVAILABLE, TIMEOUT_MARKER};
use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;

fn hop_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(.*)$").expect("valid hop line regex"))
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}$").expect("valid ipv4 regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("valid number regex"))
}

/// Tokenizer state while walking one hop line
#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenState {
    /// Nothing accumulated for the next probe
    ExpectHostOrIp,
    /// A host and/or address is known; waiting for its rtt
    ExpectRttOrMore {
        host: Option<String>,
        ip: Option<String>,
    },
}

/// Accumulates probes for a single hop line
struct HopTokenizer {
    state: TokenState,
    details: Vec<Probe>,
}

impl HopTokenizer {
    fn new() -> Self {
        Self {
            state: TokenState::ExpectHostOrIp,
            details: Vec::new(),
        }
    }

    fn accumulated(&mut self) -> (&mut Option<String>, &mut Option<String>) {
        if self.state == TokenState::ExpectHostOrIp {
            self.state = TokenState::ExpectRttOrMore {
                host: None,
                ip: None,
            };
        }
        match &mut self.state {
            TokenState::ExpectRttOrMore { host, ip } => (host, ip),
            TokenState::ExpectHostOrIp => unreachable!("state was just advanced"),
        }
    }

    fn timeout(&mut self) {
        self.details.push(Probe::timed_out());
    }

    fn name(&mut self, token: &str) {
        let (host, _) = self.accumulated();
        if host.is_none() {
            *host = Some(token.to_string());
        }
    }

    fn address(&mut self, address: &str) {
        let (host, ip) = self.accumulated();
        *ip = Some(address.to_string());
        if host.is_none() {
            *host = Some(address.to_string());
        }
    }

    fn named_address(&mut self, name: Option<&str>, address: &str) {
        match name {
            Some(name) => {
                let (host, ip) = self.accumulated();
                *host = Some(name.to_string());
                *ip = Some(address.to_string());
            }
            None => self.address(address),
        }
    }

    fn rtt(&mut self, rtt: String) {
        let (host, ip) = match std::mem::replace(&mut self.state, TokenState::ExpectHostOrIp) {
            TokenState::ExpectRttOrMore { host, ip } => (host, ip),
            TokenState::ExpectHostOrIp => (None, None),
        };
        self.details.push(Probe::new(
            host.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ip.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            rtt,
        ));
    }

    fn finish(self) -> Vec<Probe> {
        self.details
    }
}

fn is_number(token: &str) -> bool {
    number_re().is_match(token)
}

/// `"<n> ms"` if the token at `i` closes an rtt value
fn rtt_at(tokens: &[&str], i: usize) -> Option<String> {
    let token = tokens[i];
    let prefix = token.strip_suffix("ms")?;

    if i > 0 && is_number(tokens[i - 1]) {
        return Some(format!("{} ms", tokens[i - 1]));
    }
    if is_number(prefix) {
        return Some(format!("{} ms", prefix));
    }
    None
}

/// Host override and address for the `name (ip)` forms
fn paren_address<'a>(tokens: &[&'a str], i: usize) -> Option<(Option<&'a str>, String)> {
    let token = tokens[i];
    let closed = token.strip_suffix(')')?;

    if let Some(inner) = closed.strip_prefix('(') {
        return inner.parse::<IpAddr>().ok().map(|_| (None, inner.to_string()));
    }

    if i > 0 && tokens[i - 1].ends_with('(') {
        let opener = tokens[i - 1];
        let start = opener.rfind('(').map(|p| p + 1).unwrap_or(opener.len());
        let inner = format!("{}{}", &opener[start..], closed);
        if inner.parse::<IpAddr>().is_err() {
            return None;
        }
        let name = if i >= 2 { Some(tokens[i - 2]) } else { None };
        return Some((name, inner));
    }

    None
}

fn parse_hop_tokens(tokens: &[&str]) -> Vec<Probe> {
    let mut tokenizer = HopTokenizer::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];

        if token == TIMEOUT_MARKER {
            tokenizer.timeout();
            while i + 1 < tokens.len() && tokens[i + 1] == TIMEOUT_MARKER {
                i += 1;
            }
        } else if let Some(rtt) = rtt_at(tokens, i) {
            tokenizer.rtt(rtt);
        } else if ipv4_re().is_match(token) {
            tokenizer.address(token);
        } else if let Some((name, address)) = paren_address(tokens, i) {
            tokenizer.named_address(name, &address);
        } else if is_number(token) || token.ends_with('(') || token.starts_with('!') {
            // rtt candidates, paren openers and !H/!N annotations carry no host
        } else {
            tokenizer.name(token);
        }

        i += 1;
    }

    tokenizer.finish()
}

/// Parse traceroute output into an ordered list of hops
pub fn parse_traceroute(text: &str) -> Vec<Hop> {
    text.lines()
        .filter_map(|line| {
            let caps = hop_line_re().captures(line)?;
            let hop_number = caps[1].parse::<u32>().ok()?;
            let tokens: Vec<&str> = caps[2].split_whitespace().collect();
            Some(Hop {
                hop_number,
                details: parse_hop_tokens(&tokens),
            })
        })
        .collect()
}
