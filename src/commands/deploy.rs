use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use jobkit::backend::kubectl::render_manifest;
use jobkit::{Kubectl, KubectlExecutor, KubectlVerifier, SystemClock};
use ledger::Environment;

use crate::Context;
use crate::cli::DeployArgs;
use crate::cluster::KubeArtifacts;
use crate::commands;
use crate::config::Settings;
use crate::engine::{self, Collaborators, DeployRequest, Outcome, RunError, RunReport};
use crate::progress::UnitSpinner;
use crate::runner;
use crate::ui;

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let settings = ctx.settings()?;
    let env = args.env;

    if env.is_production() && !args.yes && !args.dry_run {
        confirm_production(&settings, env)?;
    }

    let request = DeployRequest {
        environment: env,
        configs_dir: settings.configs_path(env),
        capture: settings.capture_options(),
        template: settings.unit_template(env)?,
        policy: settings.wait_policy(),
        retention: settings.retention,
        audit_retention: settings.audit_retention,
        lease_ttl: settings.lease_ttl(),
        actor: resolve_actor(args.actor),
        revision: args
            .revision
            .or_else(runner::git_revision)
            .unwrap_or_else(|| "unknown".to_string()),
        ordinal: args.run_number.unwrap_or_else(|| u64::from(std::process::id())),
        force: args.force,
        dry_run: args.dry_run,
    };

    let kubectl = cluster_client(&settings, env, args.dry_run)?;
    let executor = KubectlExecutor::new(kubectl.clone());
    let verifier = KubectlVerifier::new(kubectl.clone(), settings.qm_selector(env));
    let artifacts = KubeArtifacts::new(kubectl);
    let audit = commands::audit_store()?;
    let leases = commands::lease_store()?;
    let clock = SystemClock;

    let deps = Collaborators {
        audit: &audit,
        leases: &leases,
        executor: &executor,
        verifier: &verifier,
        artifacts: &artifacts,
        clock: &clock,
    };

    if !ctx.quiet {
        ui::header(&format!("Deploying {env}"));
        ui::kv("Queue manager", &request.template.queue_manager);
        ui::kv("Namespace", &request.template.namespace);
        ui::kv("Configuration", &request.configs_dir.display().to_string());
    }

    let mut progress = UnitSpinner::new(ctx.quiet);
    match engine::deploy(&request, &deps, &mut progress) {
        Ok(report) => {
            print_report(ctx, &report)?;
            Ok(())
        }
        Err(e) => {
            print_failure(&e);
            Err(e.into())
        }
    }
}

/// kubectl for the environment. Dry runs fall back to a bare `kubectl` path
/// so they work on machines without the client.
fn cluster_client(settings: &Settings, env: Environment, dry_run: bool) -> Result<Kubectl> {
    match commands::kubectl(settings, env) {
        Ok(kubectl) => Ok(kubectl),
        Err(e) if dry_run => {
            log::debug!("kubectl unavailable for dry run: {e:#}");
            Ok(Kubectl::with_path("kubectl", settings.namespace(env)))
        }
        Err(e) => Err(e),
    }
}

fn confirm_production(settings: &Settings, env: Environment) -> Result<()> {
    let prompt = format!(
        "Deploy to {} ({})?",
        env.to_string().red().bold(),
        settings.queue_manager(env)?
    );
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;

    if !confirmed {
        bail!("Deployment to {env} cancelled");
    }
    Ok(())
}

fn resolve_actor(actor: Option<String>) -> String {
    actor
        .or_else(|| std::env::var("GITHUB_ACTOR").ok())
        .or_else(|| std::env::var("USER").ok())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_report(ctx: &Context, report: &RunReport) -> Result<()> {
    if !report.warnings.is_empty() && !ctx.quiet {
        ui::section("Warnings");
        for warning in &report.warnings {
            ui::warn(&warning.to_string());
        }
        println!();
    }

    let fingerprint = &report.snapshot.fingerprint;
    let short = &fingerprint[..snapshot::SHORT_LEN.min(fingerprint.len())];

    match &report.outcome {
        Outcome::Skipped { record } => {
            ui::success(&format!(
                "{} already at {} (deployed by {} in {}), nothing to do",
                report.snapshot.environment, short, record.actor, record.attempt
            ));
        }
        Outcome::DryRun {
            attempt,
            unit,
            previous,
        } => {
            ui::info(&format!("Dry run: would deploy {} as {}", short.bold(), attempt));
            match previous {
                Some(p) => ui::kv("Replaces", &p.fingerprint),
                None => ui::kv("Replaces", "nothing (first deployment)"),
            }
            ui::kv("Execution unit", &unit.name);
            ui::kv(
                "Files",
                &format!(
                    "{} ({})",
                    report.snapshot.file_count,
                    ui::format_size(report.snapshot.total_size)
                ),
            );
            if ctx.verbose > 0 {
                ui::section("Manifest");
                println!("{}", serde_json::to_string_pretty(&render_manifest(unit))?);
            }
        }
        Outcome::Deployed {
            record,
            report: attempt,
            cleanup,
            ..
        } => {
            ui::success(&format!(
                "Deployed {} to {} in {}",
                short.bold(),
                record.environment,
                ui::format_duration(attempt.elapsed)
            ));
            ui::kv("Attempt", &record.attempt.to_string());
            ui::kv("Record", &record.id);
            if !cleanup.deleted.is_empty() {
                ui::kv("Pruned", &cleanup.deleted.len().to_string());
            }
        }
    }
    Ok(())
}

fn print_failure(error: &RunError) {
    ui::error(&error.to_string());
    if let Some(attempt) = error.attempt() {
        ui::kv("Attempt", attempt);
    }
    if let RunError::Config { source, .. } = error
        && source.is_missing_config()
    {
        ui::dim("Create the directory or point configs_dir at it in mqdeploy.toml");
    }
    if let RunError::LeaseHeld(_) = error {
        ui::dim("Wait for the other attempt, or clear a stale lease with `mqdeploy lease release`");
    }
    if let Some(logs) = error.logs() {
        ui::section("Unit logs");
        ui::block(logs);
    }
}
