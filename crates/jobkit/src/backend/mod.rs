//! Backend abstraction for running execution units.
//!
//! The [`JobExecutor`] trait is what the orchestrator drives. The real
//! implementation shells out to `kubectl`; tests use scripted fakes.

pub mod kubectl;

use std::time::Duration;

use crate::error::Result;
use crate::types::{ExecutionUnit, UnitId, UnitStatus};

/// Contract for creating and observing execution units.
pub trait JobExecutor {
    /// Create the unit and everything it mounts. Not retried by callers.
    fn submit(&self, unit: &ExecutionUnit) -> Result<UnitId>;

    /// Current status of a submitted unit. The query should give up once
    /// `budget` has passed.
    fn status(&self, id: &UnitId, budget: Duration) -> Result<UnitStatus>;

    /// Logs of the unit's pods.
    fn logs(&self, id: &UnitId) -> Result<String>;

    /// Remove the unit from the cluster.
    fn delete(&self, id: &UnitId) -> Result<()>;
}
