//! Idempotency guard: skip deployments whose fingerprint is already live.
//!
//! The check is read-before-submit and therefore advisory under concurrent
//! invocations. Callers repeat it once they hold the environment's lease.

use crate::audit::AuditStore;
use crate::error::Result;
use crate::identity::Environment;
use crate::record::{DeploymentRecord, sort_recent_first};

/// What the guard decided for a candidate fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The most recent successful deployment already has this fingerprint
    Skip { record: DeploymentRecord },
    /// Something changed, or nothing was ever deployed
    Proceed { previous: Option<DeploymentRecord> },
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }

    /// The last successful record, whichever way the decision went
    pub fn last_record(&self) -> Option<&DeploymentRecord> {
        match self {
            Self::Skip { record } => Some(record),
            Self::Proceed { previous } => previous.as_ref(),
        }
    }
}

/// Most recent successful record for an environment, by record time.
pub fn last_success(
    store: &dyn AuditStore,
    environment: Environment,
) -> Result<Option<DeploymentRecord>> {
    let mut records = store.list_recent(environment)?;
    // Stores promise this order; re-sorting keeps recency independent of them
    sort_recent_first(&mut records);
    Ok(records.into_iter().find(|r| r.outcome.is_success()))
}

/// Compare a candidate fingerprint against the last successful deployment.
pub fn evaluate(
    store: &dyn AuditStore,
    environment: Environment,
    candidate: &str,
) -> Result<Decision> {
    let previous = last_success(store, environment)?;

    match previous {
        Some(record) if record.fingerprint == candidate => {
            log::info!(
                "{} already at {} (attempt {})",
                environment,
                candidate,
                record.attempt
            );
            Ok(Decision::Skip { record })
        }
        previous => {
            match &previous {
                Some(r) => log::info!("{}: {} -> {}", environment, r.fingerprint, candidate),
                None => log::info!("{}: no previous deployment", environment),
            }
            Ok(Decision::Proceed { previous })
        }
    }
}
