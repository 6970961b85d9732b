//! Subcommand implementations

pub mod deploy;
pub mod hash;
pub mod history;
pub mod lease;
pub mod prune;
pub mod status;

use anyhow::Result;
use jobkit::Kubectl;
use ledger::{Environment, FsAuditStore, FsLeaseStore};

use crate::config::Settings;
use crate::paths;

/// Audit store under the state directory
pub fn audit_store() -> Result<FsAuditStore> {
    Ok(FsAuditStore::new(paths::audit_dir()?))
}

/// Lease store under the state directory
pub fn lease_store() -> Result<FsLeaseStore> {
    Ok(FsLeaseStore::new(paths::lease_dir()?))
}

/// kubectl bound to an environment's namespace and the configured context
pub fn kubectl(settings: &Settings, env: Environment) -> Result<Kubectl> {
    let kubectl = Kubectl::new(settings.namespace(env))?;
    Ok(kubectl.with_context(settings.context.clone()))
}
