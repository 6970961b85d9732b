//! # Snapshot
//!
//! Content fingerprints for a directory of MQSC configuration scripts.
//!
//! This crate provides functionality to:
//! - Capture the recognized files of one environment directory
//! - Compute a BLAKE3 digest per file and a fingerprint over the sorted set
//! - Run a structural lint over the captured scripts
//!
//! ## Example
//!
//! ```no_run
//! use snapshot::{CaptureOptions, Snapshot};
//! use std::path::Path;
//!
//! let snap = Snapshot::capture("dev", Path::new("configs/dev"), &CaptureOptions::default())?;
//! println!("{} files, fingerprint {}", snap.files.len(), snap.short());
//!
//! for warning in snapshot::lint::check(&snap) {
//!     println!("warning: {warning}");
//! }
//! # Ok::<(), snapshot::Error>(())
//! ```

mod error;
pub mod lint;
mod types;

pub use error::{Error, Result};
pub use types::{CaptureOptions, SnapshotFile, SnapshotSummary, SyntaxWarning};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Number of hex characters shown for abbreviated fingerprints
pub const SHORT_LEN: usize = 8;

/// An immutable, fingerprinted set of configuration files for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Environment the files belong to
    pub environment: String,
    /// Files sorted by name
    pub files: Vec<SnapshotFile>,
    /// BLAKE3 hex digest over the sorted (name, digest) pairs
    pub fingerprint: String,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Capture the recognized files directly inside `dir`.
    ///
    /// Subdirectories are not descended into. Symlinked files are captured
    /// under the link's name with the target's content. The fingerprint does
    /// not depend on directory enumeration order.
    pub fn capture(environment: &str, dir: &Path, opts: &CaptureOptions) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::ConfigMissing(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => Error::Io(io),
                None => Error::ConfigMissing(dir.to_path_buf()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !opts.recognizes(&name) {
                log::trace!("Ignoring {}", entry.path().display());
                continue;
            }

            let bytes = read_file(entry.path())?;
            let digest = blake3::hash(&bytes).to_hex().to_string();
            let content = String::from_utf8(bytes)
                .map_err(|_| Error::NotUtf8(entry.path().to_path_buf()))?;

            files.push(SnapshotFile {
                name,
                digest,
                content,
            });
        }

        if files.is_empty() {
            return Err(Error::EmptyConfig {
                path: dir.to_path_buf(),
                extensions: opts.describe(),
            });
        }

        Ok(Self::from_files(environment, files))
    }

    /// Build a snapshot from already-loaded files (sorted here).
    pub fn from_files(environment: &str, mut files: Vec<SnapshotFile>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let fingerprint = fingerprint(files.iter().map(|f| (f.name.as_str(), f.digest.as_str())));

        log::debug!(
            "Captured {} file(s) for {}: {}",
            files.len(),
            environment,
            fingerprint
        );

        Self {
            environment: environment.to_string(),
            files,
            fingerprint,
            captured_at: Utc::now(),
        }
    }

    /// Abbreviated fingerprint for display and resource names
    pub fn short(&self) -> &str {
        &self.fingerprint[..SHORT_LEN.min(self.fingerprint.len())]
    }

    /// Total size of all file contents in bytes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(SnapshotFile::size).sum()
    }

    /// Metadata view without contents
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            environment: self.environment.clone(),
            fingerprint: self.fingerprint.clone(),
            file_count: self.files.len(),
            total_size: self.total_size(),
            captured_at: self.captured_at,
        }
    }
}

/// Compute a fingerprint over (file name, file digest) pairs.
///
/// Pairs are sorted by name first, so any enumeration order yields the same
/// result.
pub fn fingerprint<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    pairs.sort_unstable();

    let mut hasher = Hasher::new();
    for (name, digest) in pairs {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Read a whole file through a buffered reader
fn read_file(path: &Path) -> Result<Vec<u8>> {
    let map_err = |source| Error::HashFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(map_err)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(map_err)?;
    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
