//! Probe agent: configuration, preflight checks and the HTTP API

pub mod api;
pub mod config;
pub mod preflight;
