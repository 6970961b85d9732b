//! # Jobkit
//!
//! Run deployment attempts as ephemeral execution units in a cluster.
//!
//! This crate provides:
//! - **Units**: an [`ExecutionUnit`] describing the files, scripts and limits of one attempt
//! - **Orchestration**: submit a unit and poll it to a terminal state under a deadline
//! - **Retry**: exponential backoff for transient status-query failures
//! - **Verification**: post-apply health check of the queue manager
//! - **Backend**: [`JobExecutor`] and [`Verifier`] implemented over `kubectl`
//!
//! ## Example
//!
//! ```no_run
//! use jobkit::{
//!     ExecutionUnit, Kubectl, KubectlExecutor, NoProgress, Orchestrator, SystemClock,
//!     UnitTemplate, WaitPolicy,
//! };
//!
//! let executor = KubectlExecutor::new(Kubectl::new("mq-dev")?);
//! let unit = ExecutionUnit::new(
//!     &UnitTemplate::default(),
//!     "dev-20261018-101500-000042",
//!     "dev",
//!     "a1b2c3d4",
//!     vec![],
//! );
//!
//! let clock = SystemClock;
//! let report = Orchestrator::new(&executor, &clock, WaitPolicy::default()).run(&unit, &mut NoProgress);
//! println!("{}: {}", report.unit_name, report.status);
//! # Ok::<(), jobkit::Error>(())
//! ```

pub mod backend;
pub mod clock;
mod error;
pub mod orchestrator;
pub mod retry;
pub mod script;
pub mod types;
pub mod verify;

pub use backend::JobExecutor;
pub use backend::kubectl::{Kubectl, KubectlExecutor, KubectlVerifier, ManagedObject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorCategory, Result};
pub use orchestrator::{
    AttemptReport, AttemptStatus, FailureReason, NoProgress, Orchestrator, Transition,
    WaitProgress,
};
pub use types::{
    ExecutionUnit, RetryConfig, UnitFile, UnitId, UnitScripts, UnitStatus, UnitTemplate,
    WaitPolicy,
};
pub use verify::{Verification, Verifier};
