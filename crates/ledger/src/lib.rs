//! # Ledger
//!
//! Deployment state that outlives a single invocation.
//!
//! This crate provides:
//! - **Identity**: environments and sortable attempt ids
//! - **Audit**: an append-only store of successful deployments
//! - **Guard**: the deploy-if-changed decision, read from the audit store
//! - **Lease**: a per-environment claim held while an attempt is in flight
//! - **Retention**: count-bounded pruning of snapshots, units and records
//!
//! Every store is a trait with a filesystem implementation and an in-memory
//! one, so callers can be tested without touching disk or a cluster.
//!
//! ## Example
//!
//! ```no_run
//! use ledger::{AttemptId, Decision, Environment, FsAuditStore, guard};
//!
//! let store = FsAuditStore::new("/var/lib/mqdeploy/audit");
//! match guard::evaluate(&store, Environment::Dev, "a1b2c3d4")? {
//!     Decision::Skip { record } => println!("already deployed by {}", record.attempt),
//!     Decision::Proceed { .. } => {
//!         let id = AttemptId::generate(Environment::Dev, 42);
//!         println!("deploying as {id}");
//!     }
//! }
//! # Ok::<(), ledger::Error>(())
//! ```

pub mod audit;
mod error;
pub mod guard;
pub mod identity;
pub mod lease;
pub mod record;
pub mod retention;

pub use audit::{AuditStore, FsAuditStore, MemoryAuditStore};
pub use error::{Error, Result};
pub use guard::Decision;
pub use identity::{AttemptId, Environment};
pub use lease::{FsLeaseStore, Lease, LeaseStore, MemoryLeaseStore};
pub use record::{DeploymentRecord, Outcome};
pub use retention::{Artifact, ArtifactKind, ArtifactStore, MemoryArtifactStore, PruneReport};
