//! Drive one execution unit from submission to a terminal state.
//!
//! The loop is bounded by an absolute deadline measured from submission.
//! A unit that outlives the deadline is reported as timed out and left in
//! the cluster; it is never re-submitted.

use serde::Serialize;
use std::time::Duration;

use crate::backend::JobExecutor;
use crate::clock::Clock;
use crate::retry::{LogCallback, RetryCallback, with_retry_until};
use crate::types::{ExecutionUnit, UnitId, UnitStatus, WaitPolicy};

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The unit could not be created
    Submission(String),
    /// No terminal state before the deadline
    Timeout(Duration),
    /// The unit exhausted its own retry budget
    UnitFailed,
    /// Status could not be read
    StatusQuery(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submission(e) => write!(f, "submission failed: {e}"),
            Self::Timeout(after) => write!(f, "timed out after {}s", after.as_secs()),
            Self::UnitFailed => f.write_str("execution unit failed"),
            Self::StatusQuery(e) => write!(f, "status query failed: {e}"),
        }
    }
}

/// Lifecycle of a deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Created,
    Submitted,
    Running,
    Succeeded,
    Failed(FailureReason),
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Submitted => f.write_str("submitted"),
            Self::Running => f.write_str("running"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// A status change, stamped with the time since the attempt was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub status: AttemptStatus,
    pub at: Duration,
}

/// Everything observed while driving one unit
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub unit_name: String,
    pub unit_id: Option<UnitId>,
    pub status: AttemptStatus,
    pub transitions: Vec<Transition>,
    /// Unit logs, fetched only on failure
    pub logs: Option<String>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl AttemptReport {
    fn new(unit_name: &str) -> Self {
        Self {
            unit_name: unit_name.to_string(),
            unit_id: None,
            status: AttemptStatus::Created,
            transitions: vec![Transition {
                status: AttemptStatus::Created,
                at: Duration::ZERO,
            }],
            logs: None,
            polls: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn transition(&mut self, status: AttemptStatus, at: Duration) {
        log::debug!("{}: {} -> {}", self.unit_name, self.status, status);
        self.status = status.clone();
        self.transitions.push(Transition { status, at });
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Succeeded
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            AttemptStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Implement this trait to receive updates while a unit is running.
pub trait WaitProgress {
    /// Called once the unit has been accepted.
    fn on_submitted(&mut self, id: &UnitId);

    /// Called after every status poll.
    fn on_poll(&mut self, status: UnitStatus, elapsed: Duration, timeout: Duration);

    /// Called when the attempt reaches a terminal state.
    fn on_finished(&mut self, report: &AttemptReport);
}

/// No-op progress callback
pub struct NoProgress;

impl WaitProgress for NoProgress {
    fn on_submitted(&mut self, _id: &UnitId) {}
    fn on_poll(&mut self, _status: UnitStatus, _elapsed: Duration, _timeout: Duration) {}
    fn on_finished(&mut self, _report: &AttemptReport) {}
}

/// Submits units and waits for them under a [`WaitPolicy`].
pub struct Orchestrator<'a> {
    executor: &'a dyn JobExecutor,
    clock: &'a dyn Clock,
    policy: WaitPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(executor: &'a dyn JobExecutor, clock: &'a dyn Clock, policy: WaitPolicy) -> Self {
        Self {
            executor,
            clock,
            policy,
        }
    }

    /// Run one unit to a terminal state. Never returns early without one.
    pub fn run(&self, unit: &ExecutionUnit, progress: &mut impl WaitProgress) -> AttemptReport {
        let start = self.clock.now();
        let since_start = || self.clock.now().saturating_duration_since(start);
        let mut report = AttemptReport::new(&unit.name);

        let id = match self.executor.submit(unit) {
            Ok(id) => id,
            Err(e) => {
                log::error!("Failed to submit {}: {}", unit.name, e);
                report.transition(
                    AttemptStatus::Failed(FailureReason::Submission(e.to_string())),
                    since_start(),
                );
                report.elapsed = since_start();
                progress.on_finished(&report);
                return report;
            }
        };

        log::info!("Submitted {} for {}", id, unit.attempt);
        report.unit_id = Some(id.clone());
        report.transition(AttemptStatus::Submitted, since_start());
        progress.on_submitted(&id);

        let submitted_at = self.clock.now();
        let deadline = submitted_at + self.policy.timeout;

        let callback: &dyn RetryCallback = &LogCallback;
        loop {
            let status = with_retry_until(
                &self.policy.status_retry,
                self.clock,
                Some(callback),
                deadline,
                || {
                    let budget = deadline.saturating_duration_since(self.clock.now());
                    self.executor.status(&id, budget)
                },
            );
            report.polls += 1;

            let now = self.clock.now();
            if let Ok(s) = &status {
                progress.on_poll(
                    *s,
                    now.saturating_duration_since(submitted_at),
                    self.policy.timeout,
                );
            }

            // Past the deadline nothing the cluster says counts
            if now >= deadline {
                if let Ok(s) = &status
                    && s.is_terminal()
                {
                    log::warn!("{} reported {} after the deadline", id, s);
                }
                log::error!(
                    "{} did not finish within {}s",
                    id,
                    self.policy.timeout.as_secs()
                );
                report.transition(
                    AttemptStatus::Failed(FailureReason::Timeout(self.policy.timeout)),
                    since_start(),
                );
                break;
            }

            match status {
                Ok(UnitStatus::Succeeded) => {
                    report.transition(AttemptStatus::Succeeded, since_start());
                    break;
                }
                Ok(UnitStatus::Failed) => {
                    report.transition(AttemptStatus::Failed(FailureReason::UnitFailed), since_start());
                    break;
                }
                Ok(UnitStatus::Running) => {
                    if report.status != AttemptStatus::Running {
                        report.transition(AttemptStatus::Running, since_start());
                    }
                }
                Ok(UnitStatus::Pending) => {}
                Err(e) => {
                    log::error!("Could not read status of {}: {}", id, e);
                    report.transition(
                        AttemptStatus::Failed(FailureReason::StatusQuery(e.to_string())),
                        since_start(),
                    );
                    break;
                }
            }

            self.clock
                .sleep(self.policy.interval.min(deadline.saturating_duration_since(now)));
        }

        if report.failure().is_some() {
            match self.executor.logs(&id) {
                Ok(logs) => report.logs = Some(logs),
                Err(e) => log::warn!("Could not fetch logs for {}: {}", id, e),
            }
        }

        report.elapsed = since_start();
        progress.on_finished(&report);
        report
    }
}

// ============================================================================
// Tests
// ============================================================================
