//! Data types for the snapshot crate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configuration file captured into a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// File name relative to the environment directory
    pub name: String,
    /// BLAKE3 hex digest of the file content
    pub digest: String,
    /// File content
    pub content: String,
}

impl SnapshotFile {
    /// Size of the content in bytes
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Options controlling which files a capture picks up
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Recognized file extensions, without the leading dot
    pub extensions: Vec<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["mqsc".to_string()],
        }
    }
}

impl CaptureOptions {
    /// Create options recognizing the given extensions
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Check whether a file name carries a recognized extension
    pub fn recognizes(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            return false;
        }
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.extensions
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A structural problem found in a configuration file.
///
/// Warnings never block a deployment; the script interpreter is the
/// authority on syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxWarning {
    /// File the warning belongs to
    pub file: String,
    /// 1-indexed line where the offending command starts
    pub line: usize,
    /// Human-readable description
    pub message: String,
}

impl std::fmt::Display for SyntaxWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// Metadata about a snapshot without file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub environment: String,
    pub fingerprint: String,
    pub file_count: usize,
    pub total_size: u64,
    pub captured_at: DateTime<Utc>,
}
