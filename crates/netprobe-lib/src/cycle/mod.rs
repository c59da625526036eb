//! Probe cycles and their periodic trigger

mod orchestrator;
mod scheduler;

#[cfg(test)]
mod tests;

pub use orchestrator::{
    build_ping_outcome, CycleConfig, CycleState, ProbeCycleBuilder, ProbeCycleOrchestrator,
};
pub use scheduler::{PeriodicScheduler, SchedulerConfig, SchedulerStats, DEFAULT_TEST_INTERVAL};
