//! Network probe library
//!
//! This crate provides the core functionality for:
//! - Running ping and traceroute against a set of targets
//! - Parsing their text output into structured rows
//! - Geolocating traceroute hops through a TTL cache
//! - Persisting each probe cycle as a single batch
//! - Periodic scheduling, health checks and observability

pub mod cycle;
pub mod error;
pub mod geo;
pub mod health;
pub mod models;
pub mod observability;
pub mod parser;
pub mod runner;
pub mod store;

pub use cycle::{
    CycleConfig, CycleState, PeriodicScheduler, ProbeCycleOrchestrator, SchedulerConfig,
};
pub use error::{CycleError, FailureKind, ProbeFailure, StorageError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProbeMetrics, StructuredLogger};
