//! Per-environment deployment lease.
//!
//! A lease names the attempt that owns an environment until it expires.
//! It is taken after the idempotency guard decides to proceed and released
//! once the attempt's outcome is recorded. Expired leases are taken over.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::identity::Environment;

/// A claim on an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub environment: Environment,
    /// Attempt id of the holder
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(environment: Environment, owner: &str, ttl: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            environment,
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn held_error(&self) -> Error {
        Error::LeaseHeld {
            environment: self.environment,
            owner: self.owner.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Storage contract for leases
pub trait LeaseStore {
    /// The lease currently stored for an environment, expired or not
    fn current(&self, environment: Environment) -> Result<Option<Lease>>;

    /// Claim an environment. Fails with [`Error::LeaseHeld`] while another
    /// owner holds an unexpired lease.
    fn acquire(
        &self,
        environment: Environment,
        owner: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Lease>;

    /// Release a lease if it is still ours. Returns whether anything was removed.
    fn release(&self, lease: &Lease) -> Result<bool>;

    /// Remove whatever lease exists, regardless of owner.
    fn force_release(&self, environment: Environment) -> Result<Option<Lease>>;
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Leases as `<root>/<env>.lease.json`.
///
/// A lease file is written in full under a scratch name and then published
/// with a hard link, which fails if the target exists. Readers never see a
/// partial lease. An expired lease is replaced under a `<env>.takeover`
/// marker published the same way.
#[derive(Debug, Clone)]
pub struct FsLeaseStore {
    root: PathBuf,
}

/// What a lease file holds
#[derive(Debug)]
enum Slot {
    Held(Lease),
    /// Not a lease; treated as held until its mtime plus the caller's ttl
    Unreadable { modified: DateTime<Utc> },
}

impl FsLeaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, environment: Environment) -> PathBuf {
        self.root.join(format!("{}.lease.json", environment.as_str()))
    }

    /// A unique name in the store directory for staging
    fn scratch_path(&self, tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{tag}-{}-{seq}.tmp", std::process::id()))
    }

    /// Raw content and interpretation of a lease file, if one exists
    fn inspect(path: &Path) -> Result<Option<(String, Slot)>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => String::new(),
            Err(e) => return Err(e.into()),
        };

        let slot = match serde_json::from_str(&content) {
            Ok(lease) => Slot::Held(lease),
            Err(e) => {
                let modified = match fs::metadata(path).and_then(|m| m.modified()) {
                    Ok(t) => DateTime::<Utc>::from(t),
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                log::warn!("Unreadable lease {}: {}", path.display(), e);
                Slot::Unreadable { modified }
            }
        };
        Ok(Some((content, slot)))
    }

    fn read(path: &Path) -> Result<Option<Lease>> {
        Ok(match Self::inspect(path)? {
            Some((_, Slot::Held(lease))) => Some(lease),
            _ => None,
        })
    }

    /// Publish `body` at `path` unless a file is already there.
    fn publish(&self, path: &Path, body: &str) -> Result<bool> {
        let scratch = self.scratch_path("new");
        {
            let mut file = File::create(&scratch)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        let linked = fs::hard_link(&scratch, path);
        if let Err(e) = fs::remove_file(&scratch) {
            log::debug!("Could not remove {}: {}", scratch.display(), e);
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Publish, or report whoever got there first.
    fn publish_or_held(&self, path: &Path, body: &str, lease: Lease) -> Result<Lease> {
        if self.publish(path, body)? {
            return Ok(lease);
        }
        match Self::inspect(path)? {
            Some((_, Slot::Held(winner))) => Err(winner.held_error()),
            _ => Err(Error::Backend(format!(
                "could not acquire lease {}",
                path.display()
            ))),
        }
    }

    /// Marker held while an expired lease is being replaced
    fn takeover_path(&self, environment: Environment) -> PathBuf {
        self.root.join(format!("{}.takeover", environment.as_str()))
    }

    /// Remove the lease file if it still has the `observed` content.
    ///
    /// Only the holder of the takeover marker removes a lease it does not
    /// own, and only after comparing contents under the marker, so a newer
    /// lease is never removed in place of an expired one.
    fn take_over(&self, environment: Environment, observed: &str, taker: &str) -> Result<()> {
        let marker = self.takeover_path(environment);
        if !self.publish(&marker, taker)? {
            return Err(Error::Backend(format!(
                "lease on {} is being taken over (remove {} if no deploy is running)",
                environment,
                marker.display()
            )));
        }

        let result = Self::remove_if_unchanged(&self.path(environment), observed);
        if let Err(e) = fs::remove_file(&marker) {
            log::warn!("Could not remove {}: {}", marker.display(), e);
        }
        result
    }

    fn remove_if_unchanged(path: &Path, observed: &str) -> Result<()> {
        match Self::inspect(path)? {
            None => Ok(()),
            Some((content, _)) if content == observed => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Some((_, Slot::Held(current))) => Err(current.held_error()),
            Some((_, Slot::Unreadable { .. })) => Err(Error::Backend(format!(
                "lease {} changed during takeover",
                path.display()
            ))),
        }
    }
}

impl LeaseStore for FsLeaseStore {
    fn current(&self, environment: Environment) -> Result<Option<Lease>> {
        Self::read(&self.path(environment))
    }

    fn acquire(
        &self,
        environment: Environment,
        owner: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        fs::create_dir_all(&self.root)?;
        let path = self.path(environment);
        let lease = Lease::new(environment, owner, ttl, now);
        let body = serde_json::to_string_pretty(&lease)?;

        if self.publish(&path, &body)? {
            log::debug!("Acquired lease {} for {}", path.display(), owner);
            return Ok(lease);
        }

        // Someone holds (or held) the lease
        let Some((observed, slot)) = Self::inspect(&path)? else {
            return self.publish_or_held(&path, &body, lease);
        };
        match slot {
            Slot::Held(existing) if !existing.is_expired(now) && existing.owner != owner => {
                return Err(existing.held_error());
            }
            Slot::Held(existing) if existing.owner != owner => {
                log::warn!(
                    "Taking over lease on {} from {} (expired {})",
                    environment,
                    existing.owner,
                    existing.expires_at
                );
            }
            Slot::Held(_) => {}
            Slot::Unreadable { modified } => {
                let expires_at = modified + ttl;
                if now < expires_at {
                    return Err(Error::LeaseHeld {
                        environment,
                        owner: format!("unknown (unreadable {})", path.display()),
                        expires_at,
                    });
                }
                log::warn!("Replacing unreadable lease {}", path.display());
            }
        }

        self.take_over(environment, &observed, owner)?;
        self.publish_or_held(&path, &body, lease)
    }

    fn release(&self, lease: &Lease) -> Result<bool> {
        let path = self.path(lease.environment);
        match Self::read(&path)? {
            Some(current) if current.owner == lease.owner => {
                fs::remove_file(&path)?;
                log::debug!("Released lease on {}", lease.environment);
                Ok(true)
            }
            Some(current) => {
                log::warn!(
                    "Not releasing lease on {}: now owned by {}",
                    lease.environment,
                    current.owner
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn force_release(&self, environment: Environment) -> Result<Option<Lease>> {
        let path = self.path(environment);
        let existing = Self::read(&path)?;
        match fs::remove_file(self.takeover_path(environment)) {
            Ok(()) => log::warn!("Removed takeover marker for {}", environment),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(existing),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<Environment, Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Environment, Lease>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn current(&self, environment: Environment) -> Result<Option<Lease>> {
        Ok(self.lock().get(&environment).cloned())
    }

    fn acquire(
        &self,
        environment: Environment,
        owner: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        let mut leases = self.lock();
        if let Some(existing) = leases.get(&environment)
            && !existing.is_expired(now)
            && existing.owner != owner
        {
            return Err(existing.held_error());
        }
        let lease = Lease::new(environment, owner, ttl, now);
        leases.insert(environment, lease.clone());
        Ok(lease)
    }

    fn release(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.lock();
        match leases.get(&lease.environment) {
            Some(current) if current.owner == lease.owner => {
                leases.remove(&lease.environment);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn force_release(&self, environment: Environment) -> Result<Option<Lease>> {
        Ok(self.lock().remove(&environment))
    }
}

// ============================================================================
// Tests
// ============================================================================
