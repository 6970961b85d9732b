//! Centralized path resolution for mqdeploy
//!
//! # Environment Variables
//!
//! - `MQDEPLOY_STATE_DIR` - Override the state directory (audit records, leases)
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `MQDEPLOY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/mqdeploy` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\mqdeploy`
//!    - macOS/Linux: `~/.local/state/mqdeploy`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "MQDEPLOY_STATE_DIR";

/// Get the mqdeploy state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("mqdeploy");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("mqdeploy");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("mqdeploy");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Audit records: `<state>/audit/<env>/*.json`
pub fn audit_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("audit"))
}

/// Leases: `<state>/leases/<env>.lease.json`
pub fn lease_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("leases"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
