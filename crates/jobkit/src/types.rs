//! Core types for execution units and their lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Label marking every object this tool creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "mqdeploy";
pub const ENVIRONMENT_LABEL: &str = "mqdeploy/environment";
pub const ATTEMPT_LABEL: &str = "mqdeploy/attempt";
pub const FINGERPRINT_LABEL: &str = "mqdeploy/fingerprint";

/// Label values are capped at 63 characters; the full fingerprint goes in an annotation.
pub const FINGERPRINT_LABEL_LEN: usize = 16;

/// Identifier of a submitted unit (the Job name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a unit as reported by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Accepted but no pod running yet
    Pending,
    Running,
    Succeeded,
    /// Retry budget exhausted
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A configuration file mounted into the unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFile {
    pub name: String,
    pub content: String,
}

/// Shell fragments the unit runs in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitScripts {
    /// Blocks until the queue manager answers
    pub readiness: String,
    /// Applies every mounted file, failing on the first error
    pub apply: String,
    /// Prints queue manager status after applying
    pub verify: String,
}

impl UnitScripts {
    /// The three fragments joined into one container entrypoint.
    pub fn entrypoint(&self) -> String {
        format!(
            "set -eu\n{}\n{}\n{}\n",
            self.readiness.trim_end(),
            self.apply.trim_end(),
            self.verify.trim_end()
        )
    }
}

/// Settings shared by every unit of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTemplate {
    pub namespace: String,
    pub queue_manager: String,
    pub image: String,
    /// Directory the snapshot files are mounted at
    pub mount_path: String,
    /// Seconds the readiness script waits for the queue manager
    pub readiness_timeout_secs: u64,
    pub env: BTreeMap<String, String>,
    pub backoff_limit: u32,
    pub ttl_seconds_after_finished: u32,
}

impl Default for UnitTemplate {
    fn default() -> Self {
        Self {
            namespace: "mq".to_string(),
            queue_manager: "QM1".to_string(),
            image: "icr.io/ibm-messaging/mq:latest".to_string(),
            mount_path: "/etc/mqdeploy".to_string(),
            readiness_timeout_secs: 120,
            env: BTreeMap::new(),
            backoff_limit: 2,
            ttl_seconds_after_finished: 300,
        }
    }
}

/// Everything needed to run one deployment attempt in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    /// Job name
    pub name: String,
    /// Name of the ConfigMap holding the files
    pub config_name: String,
    pub attempt: String,
    pub environment: String,
    pub namespace: String,
    pub queue_manager: String,
    pub fingerprint: String,
    pub image: String,
    pub files: Vec<UnitFile>,
    pub scripts: UnitScripts,
    pub mount_path: String,
    pub env: BTreeMap<String, String>,
    pub backoff_limit: u32,
    pub ttl_seconds_after_finished: u32,
    pub labels: BTreeMap<String, String>,
}

impl ExecutionUnit {
    /// Build a unit for one attempt from the environment template.
    pub fn new(
        template: &UnitTemplate,
        attempt: &str,
        environment: &str,
        fingerprint: &str,
        files: Vec<UnitFile>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        labels.insert(ENVIRONMENT_LABEL.to_string(), environment.to_string());
        labels.insert(ATTEMPT_LABEL.to_string(), attempt.to_string());
        labels.insert(
            FINGERPRINT_LABEL.to_string(),
            fingerprint.chars().take(FINGERPRINT_LABEL_LEN).collect(),
        );

        let mut env = template.env.clone();
        env.insert("MQDEPLOY_ATTEMPT".to_string(), attempt.to_string());
        env.insert("MQDEPLOY_FINGERPRINT".to_string(), fingerprint.to_string());
        env.insert("MQ_QMGR_NAME".to_string(), template.queue_manager.clone());

        Self {
            name: unit_name(attempt),
            config_name: config_name(attempt),
            attempt: attempt.to_string(),
            environment: environment.to_string(),
            namespace: template.namespace.clone(),
            queue_manager: template.queue_manager.clone(),
            fingerprint: fingerprint.to_string(),
            image: template.image.clone(),
            files,
            scripts: crate::script::render(
                &template.queue_manager,
                &template.mount_path,
                template.readiness_timeout_secs,
            ),
            mount_path: template.mount_path.clone(),
            env,
            backoff_limit: template.backoff_limit,
            ttl_seconds_after_finished: template.ttl_seconds_after_finished,
            labels,
        }
    }
}

/// Job name for an attempt
pub fn unit_name(attempt: &str) -> String {
    format!("mqdeploy-apply-{attempt}")
}

/// ConfigMap name for an attempt
pub fn config_name(attempt: &str) -> String {
    format!("mqdeploy-config-{attempt}")
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// How long and how often the orchestrator polls a unit
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub interval: Duration,
    /// Absolute ceiling measured from submission
    pub timeout: Duration,
    /// Backoff for transient status-query failures
    pub status_retry: RetryConfig,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            status_retry: RetryConfig::default(),
        }
    }
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_delay() {
        let config = RetryConfig::new(4, Duration::from_secs(2), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        // Capped at 30s
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_unit_labels_and_names() {
        let fp = "ab".repeat(32);
        let unit = ExecutionUnit::new(
            &UnitTemplate::default(),
            "dev-20261018-101500-000042",
            "dev",
            &fp,
            vec![],
        );
        assert_eq!(unit.name, "mqdeploy-apply-dev-20261018-101500-000042");
        assert_eq!(unit.config_name, "mqdeploy-config-dev-20261018-101500-000042");
        assert!(unit.name.len() <= 63);
        assert_eq!(unit.labels[MANAGED_BY_LABEL], "mqdeploy");
        assert_eq!(unit.labels[ENVIRONMENT_LABEL], "dev");
        assert_eq!(unit.labels[FINGERPRINT_LABEL].len(), FINGERPRINT_LABEL_LEN);
        assert_eq!(unit.env["MQDEPLOY_FINGERPRINT"], fp);
        assert_eq!(unit.backoff_limit, 2);
        assert_eq!(unit.ttl_seconds_after_finished, 300);
    }

    #[test]
    fn test_template_env_is_kept() {
        let mut template = UnitTemplate::default();
        template.env.insert("LICENSE".into(), "accept".into());
        let unit = ExecutionUnit::new(&template, "test-x", "test", "f", vec![]);
        assert_eq!(unit.env["LICENSE"], "accept");
        assert_eq!(unit.env["MQ_QMGR_NAME"], "QM1");
    }

    #[test]
    fn test_terminal_status() {
        assert!(UnitStatus::Succeeded.is_terminal());
        assert!(UnitStatus::Failed.is_terminal());
        assert!(!UnitStatus::Running.is_terminal());
        assert!(!UnitStatus::Pending.is_terminal());
    }
}
