//! Error types for cluster job operations.
//!
//! Errors are categorized so the orchestrator can tell a flaky API server
//! (worth retrying) from a rejected job description (fatal for the attempt).

use thiserror::Error;

/// Categories of cluster errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// API server unreachable, throttling or timing out (transient, retryable)
    Transient,
    /// Resource does not exist
    NotFound,
    /// Job description rejected by validation
    Invalid,
    /// Resource quota exhausted
    Quota,
    /// Not allowed by RBAC or missing credentials
    Permission,
    /// kubectl missing or not runnable
    ClientMissing,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors that can occur while talking to the cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// API server unreachable or overloaded
    #[error("cluster unavailable: {message}")]
    Transient {
        /// Detailed message from the failed request
        message: String,
    },

    /// Resource not found
    #[error("not found: {name}")]
    NotFound {
        /// Name of the missing resource
        name: String,
    },

    /// Manifest rejected by the API server
    #[error("invalid job description: {message}")]
    Invalid {
        /// Validation message
        message: String,
    },

    /// Namespace quota exceeded
    #[error("quota exceeded: {message}")]
    Quota {
        /// Quota message
        message: String,
    },

    /// RBAC or authentication failure
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what was denied
        message: String,
    },

    /// kubectl is not installed or not on PATH
    #[error("kubectl not found on PATH")]
    ClientMissing,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// Unexpected response shape
    #[error("unexpected response: {0}")]
    Response(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transient { .. } => ErrorCategory::Transient,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Invalid { .. } => ErrorCategory::Invalid,
            Error::Quota { .. } => ErrorCategory::Quota,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::ClientMissing => ErrorCategory::ClientMissing,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from kubectl stderr.
    ///
    /// Analyzes the message to categorize the error appropriately.
    pub fn from_kubectl_output(stderr: &str, resource: Option<&str>) -> Self {
        let lower = stderr.to_lowercase();

        // Quota is reported as "forbidden", so check it first
        if lower.contains("exceeded quota") || lower.contains("exceeds quota") {
            return Error::Quota {
                message: stderr.trim().to_string(),
            };
        }

        if lower.contains("connection refused")
            || lower.contains("i/o timeout")
            || lower.contains("tls handshake timeout")
            || lower.contains("request timed out")
            || lower.contains("currently unable to handle")
            || lower.contains("too many requests")
            || lower.contains("service unavailable")
            || lower.contains("connection reset")
            || lower.contains("eof")
        {
            return Error::Transient {
                message: stderr.trim().to_string(),
            };
        }

        if lower.contains("(notfound)") || lower.contains("not found") {
            return Error::NotFound {
                name: resource.unwrap_or("unknown").to_string(),
            };
        }

        if lower.contains("forbidden")
            || lower.contains("unauthorized")
            || lower.contains("must be logged in")
        {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        if lower.contains("is invalid")
            || lower.contains("error validating")
            || lower.contains("unknown field")
            || lower.contains("error parsing")
        {
            return Error::Invalid {
                message: stderr.trim().to_string(),
            };
        }

        Error::CommandFailed {
            message: format!(
                "kubectl failed{}",
                resource.map(|r| format!(" for {r}")).unwrap_or_default()
            ),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
