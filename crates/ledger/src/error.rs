//! Error types for the ledger crate

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::identity::Environment;

/// Errors that can occur while reading or writing deployment state
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record with the same id already exists; records are never overwritten
    #[error("audit record already exists: {0}")]
    DuplicateRecord(String),

    /// No record with the given id
    #[error("audit record not found: {0}")]
    RecordNotFound(String),

    /// Another attempt holds the deployment lease for the environment
    #[error("{environment} is locked by attempt {owner} until {expires_at}")]
    LeaseHeld {
        environment: Environment,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    /// Environment name outside the supported set
    #[error("unknown environment '{0}' (expected one of: dev, test, prod)")]
    UnknownEnvironment(String),

    /// Malformed attempt id string
    #[error("invalid attempt id '{0}'")]
    InvalidAttemptId(String),

    /// Failure reported by an external store backend
    #[error("{0}")]
    Backend(String),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;
