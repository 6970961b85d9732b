//! Append-only audit store.
//!
//! The store is the single source of truth for "what was last deployed".
//! Records are written once and only removed by retention.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::identity::Environment;
use crate::record::{DeploymentRecord, sort_recent_first};

/// Storage contract for deployment records
pub trait AuditStore {
    /// Append a record. Fails if a record with the same id exists.
    fn put(&self, record: &DeploymentRecord) -> Result<()>;

    /// All records for an environment, most recent first by `recorded_at`.
    fn list_recent(&self, environment: Environment) -> Result<Vec<DeploymentRecord>>;

    /// Remove a record by id.
    fn delete(&self, record_id: &str) -> Result<()>;
}

// ============================================================================
// Filesystem store
// ============================================================================

/// One JSON file per record under `<root>/<env>/<record-id>.json`
#[derive(Debug, Clone)]
pub struct FsAuditStore {
    root: PathBuf,
}

impl FsAuditStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn env_dir(&self, environment: Environment) -> PathBuf {
        self.root.join(environment.as_str())
    }
}

impl AuditStore for FsAuditStore {
    fn put(&self, record: &DeploymentRecord) -> Result<()> {
        let dir = self.env_dir(record.environment);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", record.id));
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateRecord(record.id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        log::debug!("Wrote audit record {}", path.display());
        Ok(())
    }

    fn list_recent(&self, environment: Environment) -> Result<Vec<DeploymentRecord>> {
        let dir = self.env_dir(environment);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<DeploymentRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable audit record {}: {}", path.display(), e),
            }
        }

        sort_recent_first(&mut records);
        Ok(records)
    }

    fn delete(&self, record_id: &str) -> Result<()> {
        for env in Environment::ALL {
            let path = self.env_dir(env).join(format!("{record_id}.json"));
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("Deleted audit record {}", path.display());
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::RecordNotFound(record_id.to_string()))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<DeploymentRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all environments
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeploymentRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuditStore for MemoryAuditStore {
    fn put(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.lock();
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::DuplicateRecord(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn list_recent(&self, environment: Environment) -> Result<Vec<DeploymentRecord>> {
        let mut records: Vec<_> = self
            .lock()
            .iter()
            .filter(|r| r.environment == environment)
            .cloned()
            .collect();
        sort_recent_first(&mut records);
        Ok(records)
    }

    fn delete(&self, record_id: &str) -> Result<()> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != record_id);
        if records.len() == before {
            return Err(Error::RecordNotFound(record_id.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
