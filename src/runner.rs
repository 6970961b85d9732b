use anyhow::{Context, Result};
use std::process::Command;

/// Run a command and capture output
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Command failed: {}", stderr.trim())
    }
}

/// Source revision of the working tree, if it is a git checkout
pub fn git_revision() -> Option<String> {
    match run_capture("git", &["rev-parse", "HEAD"]) {
        Ok(rev) if !rev.is_empty() => Some(rev),
        Ok(_) => None,
        Err(e) => {
            log::debug!("No git revision: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_capture_trims() {
        assert_eq!(run_capture("echo", &["  hello  "]).unwrap(), "hello");
    }

    #[test]
    fn test_run_capture_failure() {
        assert!(run_capture("sh", &["-c", "echo nope >&2; exit 3"]).is_err());
        assert!(run_capture("definitely-not-a-command-mqdeploy", &[]).is_err());
    }
}
