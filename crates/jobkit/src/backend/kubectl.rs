//! Real cluster backend using `kubectl` commands.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use crate::backend::JobExecutor;
use crate::error::{Error, Result};
use crate::types::{
    ENVIRONMENT_LABEL, ExecutionUnit, MANAGED_BY, MANAGED_BY_LABEL, UnitId, UnitStatus,
};
use crate::verify::Verifier;

/// Annotation carrying the full fingerprint
pub const FINGERPRINT_ANNOTATION: &str = "mqdeploy/fingerprint-full";

/// Lines of log output fetched per pod
const LOG_TAIL: u32 = 200;

/// A thin wrapper around the `kubectl` executable, bound to one namespace.
#[derive(Debug, Clone)]
pub struct Kubectl {
    /// Path to the kubectl executable
    path: PathBuf,
    namespace: String,
    context: Option<String>,
}

impl Kubectl {
    /// Create a new wrapper.
    ///
    /// Returns [`Error::ClientMissing`] if kubectl is not installed.
    pub fn new(namespace: &str) -> Result<Self> {
        Ok(Self::with_path(find_kubectl()?, namespace))
    }

    /// Wrapper around a given executable, not checked for existence.
    pub fn with_path(path: impl Into<PathBuf>, namespace: &str) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.to_string(),
            context: None,
        }
    }

    /// Use a specific kubeconfig context instead of the current one.
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_available(&self) -> bool {
        self.command(&["version", "--client"])
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--namespace").arg(&self.namespace);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args);
        cmd
    }

    /// Run a kubectl command, optionally feeding stdin.
    fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<Output> {
        log::trace!("kubectl {}", args.join(" "));
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let spawn_err = |e: std::io::Error| {
            if e.kind() == ErrorKind::NotFound {
                Error::ClientMissing
            } else {
                Error::CommandFailed {
                    message: format!("failed to execute kubectl: {e}"),
                    stderr: String::new(),
                }
            }
        };

        match stdin {
            None => cmd.output().map_err(spawn_err),
            Some(input) => {
                cmd.stdin(Stdio::piped());
                let mut child = cmd.spawn().map_err(spawn_err)?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input.as_bytes())?;
                }
                Ok(child.wait_with_output()?)
            }
        }
    }

    /// Run a kubectl command and check for success.
    fn run_checked(&self, args: &[&str], stdin: Option<&str>, resource: Option<&str>) -> Result<String> {
        let output = self.run(args, stdin)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_kubectl_output(&stderr, resource));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// `kubectl apply -f -` with a JSON manifest.
    pub fn apply(&self, manifest: &Value) -> Result<()> {
        let body = serde_json::to_string(manifest)?;
        let out = self.run_checked(&["apply", "-f", "-"], Some(&body), None)?;
        log::debug!("{}", out.trim());
        Ok(())
    }

    /// `kubectl get <kind> <name> -o json`, bounded by a client-side
    /// request timeout.
    pub fn get_within(&self, kind: &str, name: &str, budget: Duration) -> Result<Value> {
        let timeout = request_timeout(budget);
        let out = self.run_checked(
            &["get", kind, name, "-o", "json", &timeout],
            None,
            Some(name),
        )?;
        Ok(serde_json::from_str(&out)?)
    }

    /// Items of `kubectl get <kind> -l <selector> -o json`
    pub fn list(&self, kind: &str, selector: &str) -> Result<Vec<Value>> {
        let out = self.run_checked(&["get", kind, "-l", selector, "-o", "json"], None, None)?;
        let mut list: Value = serde_json::from_str(&out)?;
        match list["items"].take() {
            Value::Array(items) => Ok(items),
            _ => Err(Error::Response(format!("no items in {kind} list"))),
        }
    }

    pub fn delete(&self, kind: &str, name: &str) -> Result<()> {
        self.run_checked(
            &["delete", kind, name, "--ignore-not-found", "--wait=false"],
            None,
            Some(name),
        )?;
        Ok(())
    }

    /// Logs of every pod matching a selector, prefixed with the pod name.
    pub fn logs(&self, selector: &str) -> Result<String> {
        let tail = format!("--tail={LOG_TAIL}");
        self.run_checked(
            &["logs", "-l", selector, "--all-containers", "--prefix", &tail],
            None,
            None,
        )
    }

    pub fn exec(&self, pod: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", pod, "--"];
        args.extend_from_slice(command);
        self.run_checked(&args, None, Some(pod))
    }

    /// Objects of one kind created by this tool for an environment.
    pub fn list_managed(&self, kind: &str, environment: &str) -> Result<Vec<ManagedObject>> {
        let items = self.list(kind, &managed_selector(environment))?;
        Ok(items.iter().filter_map(ManagedObject::from_item).collect())
    }
}

/// Find the kubectl executable: `$KUBECTL`, then `PATH`.
fn find_kubectl() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("KUBECTL")
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join("kubectl"))
        .find(|candidate| candidate.is_file())
        .ok_or(Error::ClientMissing)
}

/// `--request-timeout` for a budget, rounded up to whole seconds, at least 1s
fn request_timeout(budget: Duration) -> String {
    let secs = budget.as_secs() + u64::from(budget.subsec_nanos() > 0);
    format!("--request-timeout={}s", secs.max(1))
}

/// Label selector for everything this tool created in an environment
pub fn managed_selector(environment: &str) -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY},{ENVIRONMENT_LABEL}={environment}")
}

/// Name and creation time of a cluster object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedObject {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

impl ManagedObject {
    fn from_item(item: &Value) -> Option<Self> {
        let meta = &item["metadata"];
        let name = meta["name"].as_str()?.to_string();
        let created_at = match meta["creationTimestamp"]
            .as_str()
            .map(DateTime::parse_from_rfc3339)
        {
            Some(Ok(t)) => t.with_timezone(&Utc),
            _ => {
                log::warn!("Ignoring {} without a creation timestamp", name);
                return None;
            }
        };
        let labels = meta["labels"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            name,
            created_at,
            labels,
        })
    }
}

// ============================================================================
// Manifests
// ============================================================================

/// Metadata block shared by the ConfigMap and the Job
fn metadata(unit: &ExecutionUnit, name: &str) -> Value {
    json!({
        "name": name,
        "namespace": unit.namespace,
        "labels": unit.labels,
        "annotations": { FINGERPRINT_ANNOTATION: unit.fingerprint },
    })
}

/// ConfigMap carrying the snapshot files.
pub fn render_config_map(unit: &ExecutionUnit) -> Value {
    let data: BTreeMap<&str, &str> = unit
        .files
        .iter()
        .map(|f| (f.name.as_str(), f.content.as_str()))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": metadata(unit, &unit.config_name),
        "data": data,
    })
}

/// Job running the unit scripts against the mounted files.
pub fn render_job(unit: &ExecutionUnit) -> Value {
    let env: Vec<Value> = unit
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": metadata(unit, &unit.name),
        "spec": {
            "backoffLimit": unit.backoff_limit,
            "ttlSecondsAfterFinished": unit.ttl_seconds_after_finished,
            "template": {
                "metadata": { "labels": unit.labels },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "apply",
                        "image": unit.image,
                        "command": ["/bin/sh", "-c", unit.scripts.entrypoint()],
                        "env": env,
                        "volumeMounts": [{
                            "name": "config",
                            "mountPath": unit.mount_path,
                            "readOnly": true,
                        }],
                    }],
                    "volumes": [{
                        "name": "config",
                        "configMap": { "name": unit.config_name },
                    }],
                },
            },
        },
    })
}

/// Both objects as one `v1/List`, applied in a single call.
pub fn render_manifest(unit: &ExecutionUnit) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [render_config_map(unit), render_job(unit)],
    })
}

/// Map a Job object to a unit status.
pub fn parse_job_status(job: &Value) -> UnitStatus {
    let status = &job["status"];

    if let Some(conditions) = status["conditions"].as_array() {
        for condition in conditions {
            if condition["status"].as_str() != Some("True") {
                continue;
            }
            match condition["type"].as_str() {
                Some("Complete" | "SuccessCriteriaMet") => return UnitStatus::Succeeded,
                Some("Failed" | "FailureTarget") => return UnitStatus::Failed,
                _ => {}
            }
        }
    }

    let count = |field: &str| status[field].as_u64().unwrap_or(0);
    if count("active") > 0 || count("failed") > 0 || status["startTime"].is_string() {
        UnitStatus::Running
    } else {
        UnitStatus::Pending
    }
}

// ============================================================================
// Executor
// ============================================================================

/// [`JobExecutor`] that runs units as Kubernetes Jobs.
pub struct KubectlExecutor {
    kubectl: Kubectl,
}

impl KubectlExecutor {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

impl JobExecutor for KubectlExecutor {
    fn submit(&self, unit: &ExecutionUnit) -> Result<UnitId> {
        self.kubectl.apply(&render_manifest(unit))?;
        Ok(UnitId(unit.name.clone()))
    }

    fn status(&self, id: &UnitId, budget: Duration) -> Result<UnitStatus> {
        let job = self.kubectl.get_within("job", id.as_str(), budget)?;
        Ok(parse_job_status(&job))
    }

    fn logs(&self, id: &UnitId) -> Result<String> {
        self.kubectl.logs(&format!("job-name={id}"))
    }

    fn delete(&self, id: &UnitId) -> Result<()> {
        self.kubectl.delete("job", id.as_str())
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// [`Verifier`] that runs `dspmq` inside the queue manager pod.
pub struct KubectlVerifier {
    kubectl: Kubectl,
    /// Label selector of the queue manager pods
    selector: String,
}

impl KubectlVerifier {
    pub fn new(kubectl: Kubectl, selector: &str) -> Self {
        Self {
            kubectl,
            selector: selector.to_string(),
        }
    }

    fn running_pod(&self) -> Result<String> {
        let pods = self.kubectl.list("pods", &self.selector)?;
        pods.iter()
            .filter(|p| p["status"]["phase"].as_str() == Some("Running"))
            .find_map(|p| p["metadata"]["name"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound {
                name: format!("running pod matching {}", self.selector),
            })
    }
}

impl Verifier for KubectlVerifier {
    fn verify(&self, environment: &str, queue_manager: &str) -> Result<String> {
        let pod = self.running_pod()?;
        log::debug!("{}: verifying {} in {}", environment, queue_manager, pod);
        let out = self.kubectl.exec(&pod, &["dspmq", "-m", queue_manager])?;
        check_dspmq(&out, queue_manager)
    }
}

/// Accept `dspmq` output only if it reports the queue manager running.
pub fn check_dspmq(output: &str, queue_manager: &str) -> Result<String> {
    let wanted = format!("QMNAME({queue_manager})");
    let line = output
        .lines()
        .find(|l| l.contains(&wanted))
        .ok_or_else(|| Error::Response(format!("{queue_manager} not listed by dspmq")))?;

    if line.contains("STATUS(Running)") {
        Ok(line.trim().to_string())
    } else {
        Err(Error::Response(format!("unexpected status: {}", line.trim())))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ATTEMPT_LABEL, UnitFile, UnitTemplate};

    fn unit() -> ExecutionUnit {
        let mut template = UnitTemplate {
            namespace: "mq-dev".into(),
            queue_manager: "QMDEV".into(),
            ..Default::default()
        };
        template.env.insert("LICENSE".into(), "accept".into());
        ExecutionUnit::new(
            &template,
            "dev-20261018-101500-000042",
            "dev",
            &"c".repeat(64),
            vec![
                UnitFile {
                    name: "10-queues.mqsc".into(),
                    content: "DEFINE QLOCAL(APP.IN) REPLACE\n".into(),
                },
                UnitFile {
                    name: "20-channels.mqsc".into(),
                    content: "DEFINE CHANNEL(APP.SVRCONN) CHLTYPE(SVRCONN) REPLACE\n".into(),
                },
            ],
        )
    }

    #[test]
    fn test_render_config_map() {
        let cm = render_config_map(&unit());
        assert_eq!(cm["kind"], "ConfigMap");
        assert_eq!(cm["metadata"]["name"], "mqdeploy-config-dev-20261018-101500-000042");
        assert_eq!(cm["metadata"]["namespace"], "mq-dev");
        assert_eq!(cm["metadata"]["labels"][MANAGED_BY_LABEL], "mqdeploy");
        assert_eq!(cm["metadata"]["annotations"][FINGERPRINT_ANNOTATION], "c".repeat(64));
        assert_eq!(cm["data"]["10-queues.mqsc"], "DEFINE QLOCAL(APP.IN) REPLACE\n");
        assert_eq!(cm["data"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_render_job() {
        let job = render_job(&unit());
        assert_eq!(job["kind"], "Job");
        assert_eq!(job["spec"]["backoffLimit"], 2);
        assert_eq!(job["spec"]["ttlSecondsAfterFinished"], 300);
        assert_eq!(
            job["metadata"]["labels"][ATTEMPT_LABEL],
            "dev-20261018-101500-000042"
        );

        let pod = &job["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(
            pod["volumes"][0]["configMap"]["name"],
            "mqdeploy-config-dev-20261018-101500-000042"
        );
        let container = &pod["containers"][0];
        assert!(container["command"][2].as_str().unwrap().contains("runmqsc -c -e 'QMDEV'"));
        let env = container["env"].as_array().unwrap();
        assert!(env.iter().any(|e| e["name"] == "LICENSE" && e["value"] == "accept"));
    }

    #[test]
    fn test_render_manifest_orders_config_first() {
        let list = render_manifest(&unit());
        assert_eq!(list["items"][0]["kind"], "ConfigMap");
        assert_eq!(list["items"][1]["kind"], "Job");
    }

    #[test]
    fn test_parse_job_status() {
        assert_eq!(parse_job_status(&json!({})), UnitStatus::Pending);
        assert_eq!(
            parse_job_status(&json!({"status": {"active": 1, "startTime": "2026-10-18T10:15:00Z"}})),
            UnitStatus::Running
        );
        assert_eq!(
            parse_job_status(&json!({"status": {
                "succeeded": 1,
                "conditions": [{"type": "Complete", "status": "True"}]
            }})),
            UnitStatus::Succeeded
        );
        assert_eq!(
            parse_job_status(&json!({"status": {
                "failed": 3,
                "conditions": [{"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded"}]
            }})),
            UnitStatus::Failed
        );
        // A retry in progress is still running
        assert_eq!(
            parse_job_status(&json!({"status": {
                "failed": 1,
                "conditions": [{"type": "Failed", "status": "False"}]
            }})),
            UnitStatus::Running
        );
    }

    #[test]
    fn test_managed_object_from_item() {
        let item = json!({"metadata": {
            "name": "mqdeploy-apply-dev-x",
            "creationTimestamp": "2026-10-18T10:15:00Z",
            "labels": {"mqdeploy/environment": "dev"}
        }});
        let obj = ManagedObject::from_item(&item).unwrap();
        assert_eq!(obj.name, "mqdeploy-apply-dev-x");
        assert_eq!(obj.created_at.to_rfc3339(), "2026-10-18T10:15:00+00:00");
        assert_eq!(obj.labels["mqdeploy/environment"], "dev");

        assert!(ManagedObject::from_item(&json!({"metadata": {"name": "x"}})).is_none());
    }

    #[test]
    fn test_missing_binary_is_client_missing() {
        let kubectl = Kubectl::with_path("/nonexistent/kubectl-mqdeploy", "mq");
        assert!(!kubectl.is_available());
        assert!(matches!(
            kubectl.get_within("job", "x", Duration::from_secs(5)),
            Err(Error::ClientMissing)
        ));
    }

    #[test]
    fn test_request_timeout_rounds_up() {
        assert_eq!(request_timeout(Duration::from_secs(42)), "--request-timeout=42s");
        assert_eq!(request_timeout(Duration::from_millis(2500)), "--request-timeout=3s");
        assert_eq!(request_timeout(Duration::ZERO), "--request-timeout=1s");
    }

    #[test]
    fn test_managed_selector() {
        assert_eq!(
            managed_selector("prod"),
            "app.kubernetes.io/managed-by=mqdeploy,mqdeploy/environment=prod"
        );
    }

    #[test]
    fn test_check_dspmq() {
        let out = "QMNAME(QMDEV)                                             STATUS(Running)\n";
        assert_eq!(check_dspmq(out, "QMDEV").unwrap(), "QMNAME(QMDEV)                                             STATUS(Running)");

        let ended = "QMNAME(QMDEV)  STATUS(Ended normally)\n";
        assert!(check_dspmq(ended, "QMDEV").is_err());
        assert!(check_dspmq(out, "QMPROD").is_err());
    }
}
