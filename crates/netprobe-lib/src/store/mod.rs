//! Repository interfaces for targets and probe outcomes
//!
//! The probe pipeline only reads targets and only appends outcomes. Both
//! sides are traits so the storage engine can be swapped without touching
//! the cycle logic.

mod outcomes;
mod targets;

pub use outcomes::{FileOutcomeStore, MemoryOutcomeStore, DEFAULT_RETAINED_ROWS};
pub use targets::{FileTargetRepository, TargetRegistry};

use crate::error::StorageError;
use crate::models::{PingOutcome, ProbeOutcome, Target, TracerouteOutcome};
use async_trait::async_trait;

/// Source of the targets probed each cycle
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// All targets, ordered by id
    async fn list_all_targets(&self) -> Result<Vec<Target>, StorageError>;
}

/// Append-only store for cycle outcomes
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persist a whole cycle atomically: either every row is stored or none
    async fn save_batch(&self, outcomes: Vec<ProbeOutcome>) -> Result<(), StorageError>;

    /// Ping outcomes, most recent first
    async fn ping_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PingOutcome>, StorageError>;

    /// Traceroute outcomes, most recent first
    async fn traceroute_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TracerouteOutcome>, StorageError>;
}
