//! Post-deployment verification.
//!
//! Verification runs only after a unit succeeded. Its failure is reported
//! as a warning and never changes the outcome of the attempt.

use crate::error::Result;

/// Confirms that a queue manager is healthy after configuration was applied.
pub trait Verifier {
    /// Return a short status summary, or an error if the queue manager is unhealthy.
    fn verify(&self, environment: &str, queue_manager: &str) -> Result<String>;
}

/// Result of a verification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Confirmed(String),
    /// Could not confirm; carries the reason
    Unconfirmed(String),
}

impl Verification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Run a verifier, turning errors into [`Verification::Unconfirmed`].
pub fn run(verifier: &dyn Verifier, environment: &str, queue_manager: &str) -> Verification {
    match verifier.verify(environment, queue_manager) {
        Ok(summary) => {
            log::info!("{}: {} verified: {}", environment, queue_manager, summary.trim());
            Verification::Confirmed(summary)
        }
        Err(e) => {
            log::warn!("{}: could not verify {}: {}", environment, queue_manager, e);
            Verification::Unconfirmed(e.to_string())
        }
    }
}
