//! Error types for the snapshot crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while capturing a configuration snapshot
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The environment's configuration directory does not exist
    #[error("configuration directory does not exist: {}", .0.display())]
    ConfigMissing(PathBuf),

    /// The directory exists but holds no recognized configuration files
    #[error("no configuration files with extension {extensions} in {}", .path.display())]
    EmptyConfig { path: PathBuf, extensions: String },

    /// Failed to read or hash a file
    #[error("failed to hash file {}: {source}", .path.display())]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration scripts are mounted as text and must be UTF-8
    #[error("file is not valid UTF-8: {}", .0.display())]
    NotUtf8(PathBuf),
}

impl Error {
    /// Whether this error means there is nothing to deploy for the environment.
    pub fn is_missing_config(&self) -> bool {
        matches!(self, Self::ConfigMissing(_) | Self::EmptyConfig { .. })
    }
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, Error>;
