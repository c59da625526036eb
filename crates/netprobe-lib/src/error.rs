//! Error taxonomy for the probe pipeline
//!
//! Probe and geolocation errors are always recovered close to where they
//! happen. Only cycle-level errors (and storage failures inside them) reach
//! the operator.

use std::fmt;
use thiserror::Error;

/// Why a probe produced no usable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The program is not installed on this host
    ToolMissing,
    /// The program exited with a non-zero status
    ExecutionFailed,
    /// The program did not finish within its deadline
    Timeout,
    /// Anything else, including panics inside a probe task
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ToolMissing => "tool_missing",
            FailureKind::ExecutionFailed => "execution_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure returned by a probe runner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn tool_missing(tool: &str) -> Self {
        Self::new(
            FailureKind::ToolMissing,
            format!("{} command not found on this host", tool),
        )
    }

    pub fn timeout(tool: &str, after: std::time::Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("{} timed out after {}s", tool, after.as_secs()),
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }
}

/// Geolocation lookup errors, swallowed by the resolver
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation transport error: {0}")]
    Transport(String),

    #[error("geolocation service returned a bad response: {0}")]
    BadResponse(String),
}

/// Cache store errors
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence errors for targets and outcomes
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors that end a probe cycle early or affect its commit
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("a probe cycle is already running")]
    AlreadyRunning,

    #[error("failed to load targets: {0}")]
    Targets(#[source] StorageError),

    #[error("failed to persist cycle outcomes: {0}")]
    Storage(#[source] StorageError),
}
