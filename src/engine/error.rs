//! Fatal errors and warnings of a deployment run.

use snapshot::SyntaxWarning;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a deployment run
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration tree missing, empty or unreadable; nothing was touched
    #[error("configuration for {environment} is unusable: {source}")]
    Config {
        environment: String,
        #[source]
        source: snapshot::Error,
    },

    /// Another attempt holds the environment
    #[error("deployment lease not acquired: {0}")]
    LeaseHeld(#[source] ledger::Error),

    #[error("attempt {attempt}: {reason}")]
    Submission { attempt: String, reason: String },

    #[error("attempt {attempt}: no terminal state after {}s; the unit was left running", .after.as_secs())]
    Timeout {
        attempt: String,
        after: Duration,
        logs: Option<String>,
    },

    #[error("attempt {attempt}: execution unit failed")]
    UnitFailed {
        attempt: String,
        logs: Option<String>,
    },

    #[error("attempt {attempt}: could not read unit status: {reason}")]
    StatusQuery {
        attempt: String,
        reason: String,
        logs: Option<String>,
    },

    /// The configuration was applied but its record could not be written
    #[error("attempt {attempt} succeeded but its audit record could not be written: {source}")]
    AuditWrite {
        attempt: String,
        #[source]
        source: ledger::Error,
    },

    /// Audit or lease store unreadable
    #[error("deployment state unavailable: {0}")]
    State(#[from] ledger::Error),
}

impl RunError {
    /// Unit logs captured for the failure, if any
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::Timeout { logs, .. }
            | Self::UnitFailed { logs, .. }
            | Self::StatusQuery { logs, .. } => logs.as_deref(),
            _ => None,
        }
    }

    /// Attempt the failure belongs to, once one was assigned
    pub fn attempt(&self) -> Option<&str> {
        match self {
            Self::Submission { attempt, .. }
            | Self::Timeout { attempt, .. }
            | Self::UnitFailed { attempt, .. }
            | Self::StatusQuery { attempt, .. }
            | Self::AuditWrite { attempt, .. } => Some(attempt),
            _ => None,
        }
    }
}

/// Non-fatal findings collected during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Structural problem in a configuration file
    Syntax(SyntaxWarning),
    /// Queue manager health could not be confirmed after applying
    Verification(String),
    /// An artifact could not be listed or deleted by retention
    Cleanup { target: String, error: String },
    /// The lease could not be released
    Lease(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(w) => write!(f, "syntax: {w}"),
            Self::Verification(reason) => write!(f, "verification: {reason}"),
            Self::Cleanup { target, error } => write!(f, "cleanup of {target}: {error}"),
            Self::Lease(reason) => write!(f, "lease: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_attempt() {
        let err = RunError::Timeout {
            attempt: "dev-20261018-101500-000001".into(),
            after: Duration::from_secs(600),
            logs: Some("waiting".into()),
        };
        assert_eq!(
            err.to_string(),
            "attempt dev-20261018-101500-000001: no terminal state after 600s; the unit was left running"
        );
        assert_eq!(err.attempt(), Some("dev-20261018-101500-000001"));
        assert_eq!(err.logs(), Some("waiting"));
    }

    #[test]
    fn test_config_error_has_no_attempt() {
        let err = RunError::Config {
            environment: "dev".into(),
            source: snapshot::Error::ConfigMissing("configs/dev".into()),
        };
        assert!(err.attempt().is_none());
        assert!(err.logs().is_none());
    }

    #[test]
    fn test_warning_display() {
        let w = Warning::Cleanup {
            target: "job mqdeploy-apply-x".into(),
            error: "forbidden".into(),
        };
        assert_eq!(w.to_string(), "cleanup of job mqdeploy-apply-x: forbidden");
    }
}
