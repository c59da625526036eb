//! Target repositories

use super::TargetRepository;
use crate::error::StorageError;
use crate::models::Target;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// In-memory registry of targets
#[derive(Debug, Default)]
pub struct TargetRegistry {
    /// Map of target id -> Target
    targets: DashMap<i64, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, keeping the first entry per hostname
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let registry = Self::new();
        for target in targets {
            registry.register(target);
        }
        registry
    }

    /// Register a target; returns false if another id already uses the hostname
    pub fn register(&self, target: Target) -> bool {
        let duplicate = self
            .targets
            .iter()
            .any(|t| t.hostname == target.hostname && t.id != target.id);
        if duplicate {
            warn!(hostname = %target.hostname, "Ignoring target with duplicate hostname");
            return false;
        }

        debug!(target_id = target.id, hostname = %target.hostname, "Registering target");
        self.targets.insert(target.id, target);
        true
    }

    /// Remove a target by id
    pub fn unregister(&self, id: i64) -> Option<Target> {
        self.targets.remove(&id).map(|(_, v)| v)
    }

    /// All registered targets, ordered by id
    pub fn list(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.targets.iter().map(|r| r.value().clone()).collect();
        targets.sort_by_key(|t| t.id);
        targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl TargetRepository for TargetRegistry {
    async fn list_all_targets(&self) -> Result<Vec<Target>, StorageError> {
        Ok(self.list())
    }
}

/// Targets read from a JSON array on every call
///
/// Edits made to the file by whatever manages targets are picked up at the
/// start of the next cycle.
#[derive(Debug, Clone)]
pub struct FileTargetRepository {
    path: PathBuf,
}

impl FileTargetRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TargetRepository for FileTargetRepository {
    async fn list_all_targets(&self) -> Result<Vec<Target>, StorageError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Targets file not found, nothing to probe");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let targets: Vec<Target> = serde_json::from_slice(&content)?;
        Ok(TargetRegistry::from_targets(targets).list())
    }
}
