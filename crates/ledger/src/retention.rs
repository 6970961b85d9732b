//! Count-bounded retention of deployment artifacts.
//!
//! Selection is a pure function over artifacts and their creation times;
//! deletion goes through an [`ArtifactStore`] and never stops at the first
//! failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::audit::AuditStore;
use crate::error::{Error, Result};
use crate::identity::Environment;

/// Kind of artifact subject to retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Stored configuration snapshot (mounted into execution units)
    Snapshot,
    /// Execution unit left behind in the cluster
    Unit,
    /// Audit record
    Record,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Unit => f.write_str("execution unit"),
            Self::Record => f.write_str("audit record"),
        }
    }
}

/// Something with a name and a creation time that retention can delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub environment: Environment,
    pub created_at: DateTime<Utc>,
}

/// Listing and deletion of stored artifacts
pub trait ArtifactStore {
    fn list(&self, environment: Environment, kind: ArtifactKind) -> Result<Vec<Artifact>>;

    fn delete(&self, artifact: &Artifact) -> Result<()>;
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Number of artifacts left in place
    pub kept: usize,
    /// Names of deleted artifacts
    pub deleted: Vec<String>,
    /// Artifacts that could not be deleted (name, error)
    pub failed: Vec<(String, String)>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: PruneReport) {
        self.kept += other.kept;
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
    }
}

/// Pick every artifact except the `keep` most recent.
///
/// Sorted by creation time ascending, ties broken by name, so the result is
/// deterministic. Returned oldest first.
pub fn select_expired(mut artifacts: Vec<Artifact>, keep: usize) -> Vec<Artifact> {
    artifacts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    let excess = artifacts.len().saturating_sub(keep);
    artifacts.truncate(excess);
    artifacts
}

/// Delete all but the `keep` most recent artifacts of one kind.
///
/// A listing failure is returned as an error; individual delete failures are
/// collected in the report.
pub fn prune(
    store: &dyn ArtifactStore,
    environment: Environment,
    kind: ArtifactKind,
    keep: usize,
) -> Result<PruneReport> {
    let artifacts = store.list(environment, kind)?;
    let total = artifacts.len();
    let expired = select_expired(artifacts, keep);

    let mut report = PruneReport {
        kept: total - expired.len(),
        ..Default::default()
    };

    for artifact in expired {
        match store.delete(&artifact) {
            Ok(()) => {
                log::debug!("Deleted {} {}", kind, artifact.name);
                report.deleted.push(artifact.name);
            }
            Err(e) => {
                log::warn!("Failed to delete {} {}: {}", kind, artifact.name, e);
                report.failed.push((artifact.name, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Apply the same count bound to audit records.
pub fn prune_records(
    store: &dyn AuditStore,
    environment: Environment,
    keep: usize,
) -> Result<PruneReport> {
    struct Records<'a>(&'a dyn AuditStore);

    impl ArtifactStore for Records<'_> {
        fn list(&self, environment: Environment, kind: ArtifactKind) -> Result<Vec<Artifact>> {
            Ok(self
                .0
                .list_recent(environment)?
                .into_iter()
                .map(|r| Artifact {
                    name: r.id,
                    kind,
                    environment,
                    created_at: r.recorded_at,
                })
                .collect())
        }

        fn delete(&self, artifact: &Artifact) -> Result<()> {
            self.0.delete(&artifact.name)
        }
    }

    prune(&Records(store), environment, ArtifactKind::Record, keep)
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory artifact store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, artifact: Artifact) {
        self.lock().push(artifact);
    }

    /// Names of stored artifacts of one kind, oldest first
    pub fn names(&self, environment: Environment, kind: ArtifactKind) -> Vec<String> {
        let mut matching: Vec<_> = self
            .lock()
            .iter()
            .filter(|a| a.environment == environment && a.kind == kind)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        matching.into_iter().map(|a| a.name).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Artifact>> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn list(&self, environment: Environment, kind: ArtifactKind) -> Result<Vec<Artifact>> {
        Ok(self
            .lock()
            .iter()
            .filter(|a| a.environment == environment && a.kind == kind)
            .cloned()
            .collect())
    }

    fn delete(&self, artifact: &Artifact) -> Result<()> {
        let mut artifacts = self.lock();
        let before = artifacts.len();
        artifacts.retain(|a| !(a.name == artifact.name && a.kind == artifact.kind));
        if artifacts.len() == before {
            return Err(Error::Backend(format!("{} not found", artifact.name)));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
