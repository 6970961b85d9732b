//! Audit record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AttemptId, Environment};

/// Outcome stored on an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The execution unit reached its success terminal state
    Success,
    /// Written by a tool that knows outcomes this version does not
    #[serde(other)]
    Unknown,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// An immutable entry in the deployment history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Store key: zero-padded record timestamp in millis, then the attempt id
    pub id: String,
    /// When the record was written; defines recency
    pub recorded_at: DateTime<Utc>,
    pub environment: Environment,
    /// Snapshot fingerprint that was applied
    pub fingerprint: String,
    /// Source revision (commit) the snapshot came from
    pub revision: String,
    /// Who or what initiated the deployment
    pub actor: String,
    pub attempt: AttemptId,
    pub outcome: Outcome,
}

impl DeploymentRecord {
    /// Create a success record stamped with `recorded_at`.
    pub fn success(
        attempt: AttemptId,
        fingerprint: impl Into<String>,
        revision: impl Into<String>,
        actor: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: record_id(recorded_at, &attempt),
            recorded_at,
            environment: attempt.environment(),
            fingerprint: fingerprint.into(),
            revision: revision.into(),
            actor: actor.into(),
            attempt,
            outcome: Outcome::Success,
        }
    }
}

/// Build the timestamp-keyed id under which a record is stored.
pub fn record_id(recorded_at: DateTime<Utc>, attempt: &AttemptId) -> String {
    format!("{:013}-{}", recorded_at.timestamp_millis(), attempt)
}

/// Sort records most recent first, by record time then id.
pub fn sort_recent_first(records: &mut [DeploymentRecord]) {
    records.sort_by(|a, b| {
        b.recorded_at
            .cmp(&a.recorded_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attempt(ordinal: u64) -> AttemptId {
        AttemptId::new(
            Environment::Dev,
            Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap(),
            ordinal,
        )
    }

    #[test]
    fn test_success_record() {
        let at = Utc.timestamp_millis_opt(1_760_781_600_123).unwrap();
        let record = DeploymentRecord::success(attempt(1), "a1b2c3d4", "abc123", "ci", at);
        assert_eq!(record.environment, Environment::Dev);
        assert!(record.outcome.is_success());
        assert_eq!(record.id, "1760781600123-dev-20261018-100000-000001");
    }

    #[test]
    fn test_sort_recent_first_uses_record_time() {
        let t = |ms| Utc.timestamp_millis_opt(ms).unwrap();
        // Attempt 2 started later but its record was written first
        let mut records = vec![
            DeploymentRecord::success(attempt(2), "f2", "r", "a", t(1_000)),
            DeploymentRecord::success(attempt(1), "f1", "r", "a", t(2_000)),
        ];
        sort_recent_first(&mut records);
        assert_eq!(records[0].fingerprint, "f1");
    }

    #[test]
    fn test_unknown_outcome_deserializes() {
        let at = Utc.timestamp_millis_opt(0).unwrap();
        let record = DeploymentRecord::success(attempt(1), "f", "r", "a", at);
        let json = serde_json::to_string(&record)
            .unwrap()
            .replace("\"success\"", "\"rolled-back\"");
        let parsed: DeploymentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outcome, Outcome::Unknown);
    }
}
