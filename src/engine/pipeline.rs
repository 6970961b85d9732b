//! The deployment pipeline.
//!
//! Stages run in a fixed order: capture and lint, identity, idempotency
//! guard, lease, orchestration, verification, retention, audit. Anything
//! that fails before the orchestrator leaves the cluster untouched.

use chrono::{TimeDelta, Utc};
use jobkit::{
    AttemptReport, Clock, ExecutionUnit, FailureReason, JobExecutor, Orchestrator, UnitFile,
    UnitTemplate, Verification, Verifier, WaitPolicy, WaitProgress,
};
use ledger::retention::{self, PruneReport};
use ledger::{
    ArtifactKind, ArtifactStore, AttemptId, AuditStore, Decision, DeploymentRecord, Environment,
    Lease, LeaseStore, guard,
};
use snapshot::{CaptureOptions, Snapshot, SnapshotSummary};
use std::path::PathBuf;

use super::error::{RunError, Warning};

/// External collaborators of a run
pub struct Collaborators<'a> {
    pub audit: &'a dyn AuditStore,
    pub leases: &'a dyn LeaseStore,
    pub executor: &'a dyn JobExecutor,
    pub verifier: &'a dyn Verifier,
    pub artifacts: &'a dyn ArtifactStore,
    pub clock: &'a dyn Clock,
}

/// Everything one `deploy` invocation was asked to do
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub environment: Environment,
    pub configs_dir: PathBuf,
    pub capture: CaptureOptions,
    pub template: UnitTemplate,
    pub policy: WaitPolicy,
    /// Snapshots and units kept
    pub retention: usize,
    /// Audit records kept
    pub audit_retention: usize,
    pub lease_ttl: TimeDelta,
    pub actor: String,
    pub revision: String,
    /// Caller-supplied disambiguator of the attempt id
    pub ordinal: u64,
    /// Deploy even when the fingerprint is already live
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum Outcome {
    /// Fingerprint already deployed; nothing was submitted or recorded
    Skipped { record: DeploymentRecord },
    /// Guard said proceed, but nothing was submitted
    DryRun {
        attempt: AttemptId,
        unit: Box<ExecutionUnit>,
        previous: Option<DeploymentRecord>,
    },
    Deployed {
        record: DeploymentRecord,
        report: AttemptReport,
        previous: Option<DeploymentRecord>,
        cleanup: PruneReport,
    },
}

/// Result of a run that did not fail
#[derive(Debug)]
pub struct RunReport {
    pub snapshot: SnapshotSummary,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
}

/// Run one deployment for one environment.
pub fn deploy(
    req: &DeployRequest,
    deps: &Collaborators<'_>,
    progress: &mut impl WaitProgress,
) -> Result<RunReport, RunError> {
    let env = req.environment;
    let mut warnings = Vec::new();

    // Snapshot + lint
    let snapshot = Snapshot::capture(env.as_str(), &req.configs_dir, &req.capture).map_err(
        |source| RunError::Config {
            environment: env.to_string(),
            source,
        },
    )?;
    for warning in snapshot::lint::check(&snapshot) {
        log::warn!("{}", warning);
        warnings.push(Warning::Syntax(warning));
    }

    // Identity
    let attempt = AttemptId::generate(env, req.ordinal);
    log::info!(
        "{}: fingerprint {} ({} file(s)), attempt {}",
        env,
        snapshot.short(),
        snapshot.files.len(),
        attempt
    );

    // Guard
    let previous = match guard::evaluate(deps.audit, env, &snapshot.fingerprint)? {
        Decision::Skip { record } if !req.force => {
            return Ok(RunReport {
                snapshot: snapshot.summary(),
                outcome: Outcome::Skipped { record },
                warnings,
            });
        }
        Decision::Skip { record } => {
            log::info!("{}: forcing redeploy of {}", env, snapshot.short());
            Some(record)
        }
        Decision::Proceed { previous } => previous,
    };

    let unit = build_unit(&req.template, &attempt, &snapshot);

    if req.dry_run {
        return Ok(RunReport {
            snapshot: snapshot.summary(),
            outcome: Outcome::DryRun {
                attempt,
                unit: Box::new(unit),
                previous,
            },
            warnings,
        });
    }

    // Lease
    let owner = attempt.to_string();
    let lease = deps
        .leases
        .acquire(env, &owner, req.lease_ttl, Utc::now())
        .map_err(|e| match e {
            ledger::Error::LeaseHeld { .. } => RunError::LeaseHeld(e),
            other => RunError::State(other),
        })?;

    // Held until the record is written, so a concurrent run either sees the
    // lease or the record
    let result = deploy_leased(req, deps, progress, &snapshot, &unit, attempt, &mut warnings);
    release_lease(deps.leases, &lease, &mut warnings);

    Ok(RunReport {
        snapshot: snapshot.summary(),
        outcome: result?,
        warnings,
    })
}

/// Everything that runs while the environment's lease is held.
fn deploy_leased(
    req: &DeployRequest,
    deps: &Collaborators<'_>,
    progress: &mut impl WaitProgress,
    snapshot: &Snapshot,
    unit: &ExecutionUnit,
    attempt: AttemptId,
    warnings: &mut Vec<Warning>,
) -> Result<Outcome, RunError> {
    let env = req.environment;
    let owner = attempt.to_string();

    // Another run may have finished between the first check and the lease
    let previous = match guard::evaluate(deps.audit, env, &snapshot.fingerprint)? {
        Decision::Skip { record } if !req.force => {
            log::info!("{}: {} was deployed by {} meanwhile", env, snapshot.short(), record.attempt);
            return Ok(Outcome::Skipped { record });
        }
        decision => decision.last_record().cloned(),
    };

    // Orchestrate
    let report = Orchestrator::new(deps.executor, deps.clock, req.policy.clone()).run(unit, progress);
    if let Some(reason) = report.failure() {
        return Err(failure(&owner, reason, report.logs.clone()));
    }

    // Verify
    if let Verification::Unconfirmed(reason) =
        jobkit::verify::run(deps.verifier, env.as_str(), &unit.queue_manager)
    {
        warnings.push(Warning::Verification(reason));
    }

    // Retention of cluster artifacts
    let mut cleanup = PruneReport::default();
    for kind in [ArtifactKind::Snapshot, ArtifactKind::Unit] {
        collect_cleanup(
            retention::prune(deps.artifacts, env, kind, req.retention),
            &kind.to_string(),
            &mut cleanup,
            warnings,
        );
    }

    // Audit
    let record = DeploymentRecord::success(
        attempt,
        snapshot.fingerprint.clone(),
        req.revision.clone(),
        req.actor.clone(),
        Utc::now(),
    );
    deps.audit
        .put(&record)
        .map_err(|source| RunError::AuditWrite {
            attempt: owner.clone(),
            source,
        })?;
    log::info!("{}: recorded {}", env, record.id);

    collect_cleanup(
        retention::prune_records(deps.audit, env, req.audit_retention),
        "audit record",
        &mut cleanup,
        warnings,
    );

    Ok(Outcome::Deployed {
        record,
        report,
        previous,
        cleanup,
    })
}

fn build_unit(template: &UnitTemplate, attempt: &AttemptId, snapshot: &Snapshot) -> ExecutionUnit {
    let files = snapshot
        .files
        .iter()
        .map(|f| UnitFile {
            name: f.name.clone(),
            content: f.content.clone(),
        })
        .collect();
    ExecutionUnit::new(
        template,
        &attempt.to_string(),
        &snapshot.environment,
        &snapshot.fingerprint,
        files,
    )
}

fn release_lease(leases: &dyn LeaseStore, lease: &Lease, warnings: &mut Vec<Warning>) {
    match leases.release(lease) {
        Ok(true) => {}
        Ok(false) => {
            let msg = format!("lease on {} was no longer held by {}", lease.environment, lease.owner);
            log::warn!("{}", msg);
            warnings.push(Warning::Lease(msg));
        }
        Err(e) => {
            log::warn!("Failed to release lease on {}: {}", lease.environment, e);
            warnings.push(Warning::Lease(e.to_string()));
        }
    }
}

fn collect_cleanup(
    result: ledger::Result<PruneReport>,
    what: &str,
    total: &mut PruneReport,
    warnings: &mut Vec<Warning>,
) {
    match result {
        Ok(report) => {
            for (name, error) in &report.failed {
                warnings.push(Warning::Cleanup {
                    target: format!("{what} {name}"),
                    error: error.clone(),
                });
            }
            total.merge(report);
        }
        Err(e) => {
            log::warn!("Could not list {} artifacts: {}", what, e);
            warnings.push(Warning::Cleanup {
                target: format!("{what} listing"),
                error: e.to_string(),
            });
        }
    }
}

fn failure(attempt: &str, reason: &FailureReason, logs: Option<String>) -> RunError {
    let attempt = attempt.to_string();
    match reason {
        FailureReason::Submission(reason) => RunError::Submission {
            attempt,
            reason: reason.clone(),
        },
        FailureReason::Timeout(after) => RunError::Timeout {
            attempt,
            after: *after,
            logs,
        },
        FailureReason::UnitFailed => RunError::UnitFailed { attempt, logs },
        FailureReason::StatusQuery(reason) => RunError::StatusQuery {
            attempt,
            reason: reason.clone(),
            logs,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use jobkit::{ManualClock, NoProgress, RetryConfig, UnitId, UnitStatus};
    use ledger::{Artifact, MemoryArtifactStore, MemoryAuditStore, MemoryLeaseStore};
    use std::cell::RefCell;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const QUEUES: &str = "* application queues\nDEFINE QLOCAL(APP.IN) REPLACE\nDEFINE QLOCAL(APP.OUT) +\n  MAXDEPTH(5000) REPLACE\n";
    const CHANNELS: &str = "DEFINE CHANNEL(APP.SVRCONN) CHLTYPE(SVRCONN) REPLACE\n";

    /// Cluster double: records submissions and registers their artifacts
    struct FakeCluster<'a> {
        artifacts: &'a MemoryArtifactStore,
        terminal: UnitStatus,
        reject: bool,
        submitted: RefCell<Vec<ExecutionUnit>>,
        base: DateTime<Utc>,
    }

    impl<'a> FakeCluster<'a> {
        fn new(artifacts: &'a MemoryArtifactStore, terminal: UnitStatus) -> Self {
            Self {
                artifacts,
                terminal,
                reject: false,
                submitted: RefCell::new(Vec::new()),
                base: Utc::now(),
            }
        }

        fn submissions(&self) -> usize {
            self.submitted.borrow().len()
        }
    }

    impl JobExecutor for FakeCluster<'_> {
        fn submit(&self, unit: &ExecutionUnit) -> jobkit::Result<UnitId> {
            if self.reject {
                return Err(jobkit::Error::Invalid {
                    message: "spec.template.spec.containers[0].image: Required value".into(),
                });
            }
            let mut submitted = self.submitted.borrow_mut();
            let created_at = self.base + TimeDelta::seconds(submitted.len() as i64);
            let environment: Environment = unit.environment.parse().unwrap();
            for (name, kind) in [
                (&unit.config_name, ArtifactKind::Snapshot),
                (&unit.name, ArtifactKind::Unit),
            ] {
                self.artifacts.insert(Artifact {
                    name: name.clone(),
                    kind,
                    environment,
                    created_at,
                });
            }
            submitted.push(unit.clone());
            Ok(UnitId(unit.name.clone()))
        }

        fn status(&self, _id: &UnitId, _budget: Duration) -> jobkit::Result<UnitStatus> {
            Ok(self.terminal)
        }

        fn logs(&self, _id: &UnitId) -> jobkit::Result<String> {
            Ok("AMQ8405I: Syntax error detected at or near end of command segment below".into())
        }

        fn delete(&self, _id: &UnitId) -> jobkit::Result<()> {
            Ok(())
        }
    }

    struct FakeVerifier(bool);

    impl Verifier for FakeVerifier {
        fn verify(&self, _environment: &str, queue_manager: &str) -> jobkit::Result<String> {
            if self.0 {
                Ok(format!("QMNAME({queue_manager}) STATUS(Running)"))
            } else {
                Err(jobkit::Error::NotFound {
                    name: "running pod matching app.kubernetes.io/name=ibm-mq".into(),
                })
            }
        }
    }

    struct World {
        tmp: TempDir,
        audit: MemoryAuditStore,
        leases: MemoryLeaseStore,
        artifacts: MemoryArtifactStore,
        clock: ManualClock,
    }

    impl World {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let dir = tmp.path().join("configs").join("dev");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("10-queues.mqsc"), QUEUES).unwrap();
            fs::write(dir.join("20-channels.mqsc"), CHANNELS).unwrap();
            Self {
                tmp,
                audit: MemoryAuditStore::new(),
                leases: MemoryLeaseStore::new(),
                artifacts: MemoryArtifactStore::new(),
                clock: ManualClock::new(),
            }
        }

        fn configs(&self) -> PathBuf {
            self.tmp.path().join("configs").join("dev")
        }

        fn request(&self, ordinal: u64) -> DeployRequest {
            DeployRequest {
                environment: Environment::Dev,
                configs_dir: self.configs(),
                capture: CaptureOptions::default(),
                template: UnitTemplate {
                    namespace: "mq-dev".into(),
                    queue_manager: "QMDEV".into(),
                    ..Default::default()
                },
                policy: WaitPolicy {
                    interval: Duration::from_secs(5),
                    timeout: Duration::from_secs(60),
                    status_retry: RetryConfig::no_retry(),
                },
                retention: 5,
                audit_retention: 100,
                lease_ttl: TimeDelta::seconds(900),
                actor: "ci-bot".into(),
                revision: "4f2a9c1".into(),
                ordinal,
                force: false,
                dry_run: false,
            }
        }

        fn deps<'a>(&'a self, cluster: &'a FakeCluster<'a>, verifier: &'a FakeVerifier) -> Collaborators<'a> {
            Collaborators {
                audit: &self.audit,
                leases: &self.leases,
                executor: cluster,
                verifier,
                artifacts: &self.artifacts,
                clock: &self.clock,
            }
        }

        fn records(&self) -> Vec<DeploymentRecord> {
            self.audit.list_recent(Environment::Dev).unwrap()
        }
    }

    #[test]
    fn test_first_run_deploys_second_run_skips() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let first = deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        match &first.outcome {
            Outcome::Deployed { record, report, previous, .. } => {
                assert!(report.is_success());
                assert!(previous.is_none());
                assert_eq!(record.fingerprint, first.snapshot.fingerprint);
                assert_eq!(record.actor, "ci-bot");
                assert_eq!(record.revision, "4f2a9c1");
            }
            other => panic!("Expected Deployed, got: {:?}", other),
        }
        assert!(first.warnings.is_empty(), "{:?}", first.warnings);
        assert_eq!(cluster.submissions(), 1);
        assert_eq!(world.records().len(), 1);

        let second = deploy(&world.request(2), &deps, &mut NoProgress).unwrap();
        assert!(matches!(second.outcome, Outcome::Skipped { .. }));
        assert_eq!(second.snapshot.fingerprint, first.snapshot.fingerprint);
        assert_eq!(cluster.submissions(), 1);
        assert_eq!(world.records().len(), 1);
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn test_changed_config_proceeds_against_previous() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        let first_fp = world.records()[0].fingerprint.clone();

        fs::write(
            world.configs().join("10-queues.mqsc"),
            "DEFINE QLOCAL(APP.IN) MAXDEPTH(9000) REPLACE\n",
        )
        .unwrap();

        let run = deploy(&world.request(2), &deps, &mut NoProgress).unwrap();
        match run.outcome {
            Outcome::Deployed { previous, record, .. } => {
                assert_eq!(previous.unwrap().fingerprint, first_fp);
                assert_ne!(record.fingerprint, first_fp);
            }
            other => panic!("Expected Deployed, got: {:?}", other),
        }
        assert_eq!(cluster.submissions(), 2);
        assert_eq!(world.records().len(), 2);
    }

    #[test]
    fn test_force_bypasses_skip() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        let mut forced = world.request(2);
        forced.force = true;
        let run = deploy(&forced, &deps, &mut NoProgress).unwrap();

        assert!(matches!(run.outcome, Outcome::Deployed { .. }));
        assert_eq!(cluster.submissions(), 2);
        assert_eq!(world.records().len(), 2);
    }

    #[test]
    fn test_timeout_writes_no_record() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Running);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let err = deploy(&world.request(7), &deps, &mut NoProgress).unwrap_err();
        match &err {
            RunError::Timeout { attempt, after, logs } => {
                assert!(attempt.starts_with("dev-"));
                assert!(attempt.ends_with("-000007"));
                assert_eq!(*after, Duration::from_secs(60));
                assert!(logs.is_some());
            }
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert_eq!(world.clock.elapsed(), Duration::from_secs(60));
        assert_eq!(cluster.submissions(), 1);
        assert!(world.records().is_empty());
        // Lease released even on failure
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());

        // Nothing recorded, so the next run deploys again
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let deps = world.deps(&cluster, &verifier);
        let run = deploy(&world.request(8), &deps, &mut NoProgress).unwrap();
        assert!(matches!(run.outcome, Outcome::Deployed { previous: None, .. }));
    }

    #[test]
    fn test_unit_failure_carries_logs() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Failed);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let err = deploy(&world.request(1), &deps, &mut NoProgress).unwrap_err();
        assert!(matches!(err, RunError::UnitFailed { .. }));
        assert!(err.logs().unwrap().contains("AMQ8405I"));
        assert!(err.attempt().unwrap().starts_with("dev-"));
        assert!(world.records().is_empty());
    }

    #[test]
    fn test_submission_failure() {
        let world = World::new();
        let mut cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        cluster.reject = true;
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let err = deploy(&world.request(1), &deps, &mut NoProgress).unwrap_err();
        match err {
            RunError::Submission { reason, .. } => assert!(reason.contains("Required value")),
            other => panic!("Expected Submission, got: {:?}", other),
        }
        assert!(world.records().is_empty());
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn test_missing_config_touches_nothing() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let mut req = world.request(1);
        req.configs_dir = world.tmp.path().join("configs").join("prod");
        req.environment = Environment::Prod;

        let err = deploy(&req, &deps, &mut NoProgress).unwrap_err();
        match err {
            RunError::Config { source, .. } => assert!(source.is_missing_config()),
            other => panic!("Expected Config, got: {:?}", other),
        }
        assert_eq!(cluster.submissions(), 0);
        assert!(world.leases.current(Environment::Prod).unwrap().is_none());
    }

    #[test]
    fn test_empty_config_is_fatal() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let dir = world.tmp.path().join("configs").join("test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README.md"), "not a script").unwrap();
        let mut req = world.request(1);
        req.configs_dir = dir;
        req.environment = Environment::Test;

        assert!(matches!(
            deploy(&req, &deps, &mut NoProgress),
            Err(RunError::Config { .. })
        ));
        assert_eq!(cluster.submissions(), 0);
    }

    #[test]
    fn test_held_lease_blocks_submission() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        world
            .leases
            .acquire(Environment::Dev, "dev-20261018-090000-000001", TimeDelta::seconds(900), Utc::now())
            .unwrap();

        let err = deploy(&world.request(2), &deps, &mut NoProgress).unwrap_err();
        assert!(matches!(err, RunError::LeaseHeld(_)));
        assert!(err.to_string().contains("dev-20261018-090000-000001"));
        assert_eq!(cluster.submissions(), 0);
        assert!(world.records().is_empty());
    }

    #[test]
    fn test_verification_failure_is_a_warning() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(false);
        let deps = world.deps(&cluster, &verifier);

        let run = deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        assert!(matches!(run.outcome, Outcome::Deployed { .. }));
        assert!(matches!(run.warnings.as_slice(), [Warning::Verification(_)]));
        assert_eq!(world.records().len(), 1);
    }

    #[test]
    fn test_syntax_warnings_do_not_block() {
        let world = World::new();
        fs::write(world.configs().join("30-broken.mqsc"), "DEFINE QLOCAL(BROKEN\n").unwrap();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let run = deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        assert!(matches!(run.outcome, Outcome::Deployed { .. }));
        assert!(run.warnings.iter().any(|w| matches!(w, Warning::Syntax(s) if s.file == "30-broken.mqsc")));
        assert_eq!(cluster.submitted.borrow()[0].files.len(), 3);
    }

    #[test]
    fn test_dry_run_submits_nothing() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        let mut req = world.request(1);
        req.dry_run = true;
        let run = deploy(&req, &deps, &mut NoProgress).unwrap();
        match run.outcome {
            Outcome::DryRun { unit, previous, .. } => {
                assert!(previous.is_none());
                assert_eq!(unit.files.len(), 2);
                assert_eq!(unit.namespace, "mq-dev");
            }
            other => panic!("Expected DryRun, got: {:?}", other),
        }
        assert_eq!(cluster.submissions(), 0);
        assert!(world.records().is_empty());
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn test_retention_keeps_most_recent() {
        let world = World::new();
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = world.deps(&cluster, &verifier);

        for ordinal in 1..=7 {
            let mut req = world.request(ordinal);
            req.force = true;
            req.audit_retention = 3;
            deploy(&req, &deps, &mut NoProgress).unwrap();
        }

        let units = world.artifacts.names(Environment::Dev, ArtifactKind::Unit);
        let submitted: Vec<String> = cluster.submitted.borrow().iter().map(|u| u.name.clone()).collect();
        assert_eq!(units, submitted[2..].to_vec());
        assert_eq!(world.artifacts.names(Environment::Dev, ArtifactKind::Snapshot).len(), 5);

        let records = world.records();
        assert_eq!(records.len(), 3);
        assert!(records[0].attempt.to_string().ends_with("-000007"));
    }

    #[test]
    fn test_guard_rechecked_under_lease() {
        /// Lets a concurrent run record the same fingerprint while we wait
        /// for the lease
        struct Contended<'a> {
            inner: &'a MemoryLeaseStore,
            audit: &'a MemoryAuditStore,
            fingerprint: String,
        }

        impl LeaseStore for Contended<'_> {
            fn current(&self, env: Environment) -> ledger::Result<Option<Lease>> {
                self.inner.current(env)
            }
            fn acquire(
                &self,
                env: Environment,
                owner: &str,
                ttl: TimeDelta,
                now: DateTime<Utc>,
            ) -> ledger::Result<Lease> {
                let other = AttemptId::new(env, now, 999);
                self.audit.put(&DeploymentRecord::success(
                    other,
                    self.fingerprint.clone(),
                    "4f2a9c1",
                    "other-runner",
                    now,
                ))?;
                self.inner.acquire(env, owner, ttl, now)
            }
            fn release(&self, lease: &Lease) -> ledger::Result<bool> {
                self.inner.release(lease)
            }
            fn force_release(&self, env: Environment) -> ledger::Result<Option<Lease>> {
                self.inner.force_release(env)
            }
        }

        let world = World::new();
        let fingerprint = Snapshot::capture("dev", &world.configs(), &CaptureOptions::default())
            .unwrap()
            .fingerprint;
        let leases = Contended {
            inner: &world.leases,
            audit: &world.audit,
            fingerprint: fingerprint.clone(),
        };
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = Collaborators {
            leases: &leases,
            ..world.deps(&cluster, &verifier)
        };

        let run = deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        match &run.outcome {
            Outcome::Skipped { record } => assert_eq!(record.actor, "other-runner"),
            other => panic!("Expected Skipped, got: {:?}", other),
        }
        assert_eq!(cluster.submissions(), 0);
        let records = world.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fingerprint, fingerprint);
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn test_lease_held_until_record_written() {
        /// Reports whether the lease is still held when the record lands
        struct Observed<'a> {
            inner: &'a MemoryAuditStore,
            leases: &'a MemoryLeaseStore,
            held_at_put: RefCell<Option<bool>>,
        }

        impl AuditStore for Observed<'_> {
            fn put(&self, record: &DeploymentRecord) -> ledger::Result<()> {
                let held = self.leases.current(record.environment)?.is_some();
                *self.held_at_put.borrow_mut() = Some(held);
                self.inner.put(record)
            }
            fn list_recent(&self, env: Environment) -> ledger::Result<Vec<DeploymentRecord>> {
                self.inner.list_recent(env)
            }
            fn delete(&self, id: &str) -> ledger::Result<()> {
                self.inner.delete(id)
            }
        }

        let world = World::new();
        let audit = Observed {
            inner: &world.audit,
            leases: &world.leases,
            held_at_put: RefCell::new(None),
        };
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = Collaborators {
            audit: &audit,
            ..world.deps(&cluster, &verifier)
        };

        let run = deploy(&world.request(1), &deps, &mut NoProgress).unwrap();
        assert!(matches!(run.outcome, Outcome::Deployed { .. }));
        assert_eq!(*audit.held_at_put.borrow(), Some(true));
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn test_audit_write_failure_is_fatal() {
        struct Failing(MemoryAuditStore);
        impl AuditStore for Failing {
            fn put(&self, _record: &DeploymentRecord) -> ledger::Result<()> {
                Err(ledger::Error::Io(std::io::Error::other("disk full")))
            }
            fn list_recent(&self, env: Environment) -> ledger::Result<Vec<DeploymentRecord>> {
                self.0.list_recent(env)
            }
            fn delete(&self, id: &str) -> ledger::Result<()> {
                self.0.delete(id)
            }
        }

        let world = World::new();
        let audit = Failing(MemoryAuditStore::new());
        let cluster = FakeCluster::new(&world.artifacts, UnitStatus::Succeeded);
        let verifier = FakeVerifier(true);
        let deps = Collaborators {
            audit: &audit,
            ..world.deps(&cluster, &verifier)
        };

        let err = deploy(&world.request(3), &deps, &mut NoProgress).unwrap_err();
        match &err {
            RunError::AuditWrite { attempt, .. } => assert!(attempt.ends_with("-000003")),
            other => panic!("Expected AuditWrite, got: {:?}", other),
        }
        assert_eq!(cluster.submissions(), 1);
        assert!(world.leases.current(Environment::Dev).unwrap().is_none());
    }
}
