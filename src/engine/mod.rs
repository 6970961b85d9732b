//! Deployment engine for mqdeploy
//!
//! The engine runs one deployment end to end:
//! 1. Snapshot - Hash and lint the environment's configuration tree
//! 2. Guard - Skip when the fingerprint is already live
//! 3. Orchestrate - Submit an execution unit and wait for it under a lease
//! 4. Finish - Verify, apply retention and write the audit record

pub mod error;
pub mod pipeline;

pub use error::RunError;
pub use pipeline::{Collaborators, DeployRequest, Outcome, RunReport, deploy};
