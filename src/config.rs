//! Deploy settings loaded from `mqdeploy.toml`.

use anyhow::{Context, Result, bail};
use jobkit::{RetryConfig, UnitTemplate, WaitPolicy};
use ledger::Environment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snapshot::CaptureOptions;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::paths;

/// Queue manager names accepted by MQ
static QM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%]{1,48}$").expect("valid regex"));

/// Default label selector of queue manager pods
const DEFAULT_QM_SELECTOR: &str = "app.kubernetes.io/name=ibm-mq";

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the per-environment configuration trees
    pub configs_dir: String,
    pub namespace: String,
    /// Image of the execution unit (must carry the MQ client)
    pub image: String,
    pub extensions: Vec<String>,
    /// Snapshots and execution units kept per environment
    pub retention: usize,
    /// Audit records kept per environment
    pub audit_retention: usize,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub backoff_limit: u32,
    pub ttl_seconds_after_finished: u32,
    pub lease_ttl_secs: u64,
    pub readiness_timeout_secs: u64,
    /// kubeconfig context; current context when unset
    pub context: Option<String>,
    pub qm_selector: String,
    pub environments: BTreeMap<String, EnvironmentSettings>,
    /// Fixed environment variables for the execution unit
    pub env_vars: BTreeMap<String, String>,

    /// Directory relative `configs_dir` values are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    pub queue_manager: String,
    pub namespace: Option<String>,
    pub qm_selector: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            configs_dir: "configs".to_string(),
            namespace: "mq".to_string(),
            image: "icr.io/ibm-messaging/mq:9.4.0.0-r1".to_string(),
            extensions: vec!["mqsc".to_string()],
            retention: 5,
            audit_retention: 100,
            timeout_secs: 600,
            poll_interval_secs: 5,
            backoff_limit: 2,
            ttl_seconds_after_finished: 300,
            lease_ttl_secs: 900,
            readiness_timeout_secs: 120,
            context: None,
            qm_selector: DEFAULT_QM_SELECTOR.to_string(),
            environments: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load settings from a file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut settings = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("Invalid {}", path.display()))?
        } else {
            log::info!("{} not found, using defaults", path.display());
            Self::default()
        };

        settings.base_dir = base_dir;
        settings.validate()?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings that would make a deployment misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.retention == 0 {
            bail!("retention must be at least 1");
        }
        if self.audit_retention == 0 {
            bail!("audit_retention must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.poll_interval_secs > self.timeout_secs {
            bail!(
                "poll_interval_secs ({}) is larger than timeout_secs ({})",
                self.poll_interval_secs,
                self.timeout_secs
            );
        }
        if self.lease_ttl_secs < self.timeout_secs {
            log::warn!(
                "lease_ttl_secs ({}) is shorter than timeout_secs ({}); a slow attempt may lose its lease",
                self.lease_ttl_secs,
                self.timeout_secs
            );
        }

        for (name, env) in &self.environments {
            name.parse::<Environment>()
                .with_context(|| format!("Invalid [environments.{name}]"))?;
            if !QM_NAME.is_match(&env.queue_manager) {
                bail!(
                    "Invalid queue manager name '{}' for {}",
                    env.queue_manager,
                    name
                );
            }
        }
        Ok(())
    }

    fn environment(&self, env: Environment) -> Option<&EnvironmentSettings> {
        self.environments.get(env.as_str())
    }

    /// Queue manager of an environment
    pub fn queue_manager(&self, env: Environment) -> Result<&str> {
        self.environment(env)
            .map(|e| e.queue_manager.as_str())
            .with_context(|| format!("No queue manager configured for {env} (add [environments.{env}])"))
    }

    pub fn namespace(&self, env: Environment) -> &str {
        self.environment(env)
            .and_then(|e| e.namespace.as_deref())
            .unwrap_or(&self.namespace)
    }

    pub fn qm_selector(&self, env: Environment) -> &str {
        self.environment(env)
            .and_then(|e| e.qm_selector.as_deref())
            .unwrap_or(&self.qm_selector)
    }

    /// `configs/<env>`, resolved against the settings file location
    pub fn configs_path(&self, env: Environment) -> PathBuf {
        let root = paths::expand(&self.configs_dir);
        let root = if root.is_absolute() {
            root
        } else {
            self.base_dir.join(root)
        };
        root.join(env.as_str())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions::with_extensions(&self.extensions)
    }

    pub fn unit_template(&self, env: Environment) -> Result<UnitTemplate> {
        Ok(UnitTemplate {
            namespace: self.namespace(env).to_string(),
            queue_manager: self.queue_manager(env)?.to_string(),
            image: self.image.clone(),
            readiness_timeout_secs: self.readiness_timeout_secs,
            env: self.env_vars.clone(),
            backoff_limit: self.backoff_limit,
            ttl_seconds_after_finished: self.ttl_seconds_after_finished,
            ..Default::default()
        })
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            status_retry: RetryConfig::default(),
        }
    }

    pub fn lease_ttl(&self) -> chrono::TimeDelta {
        i64::try_from(self.lease_ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

// ============================================================================
// Tests
// ============================================================================
