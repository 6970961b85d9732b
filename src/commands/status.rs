use anyhow::Result;
use colored::Colorize;
use ledger::{Environment, LeaseStore, guard};

use crate::Context;
use crate::commands::{self, hash};
use crate::ui;

pub fn run(ctx: &Context, env: Environment) -> Result<()> {
    let settings = ctx.settings()?;
    ui::header(&format!("Status of {env}"));

    let snapshot = match hash::capture(&settings, env) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            ui::warn(&format!("{e:#}"));
            None
        }
    };
    let last = guard::last_success(&commands::audit_store()?, env)?;

    ui::section("Configuration");
    match &snapshot {
        Some(s) => {
            ui::kv("Directory", &settings.configs_path(env).display().to_string());
            ui::kv("Fingerprint", s.short());
            ui::kv("Files", &s.files.len().to_string());
        }
        None => ui::dim("unavailable"),
    }

    ui::section("Cluster");
    ui::kv("Namespace", settings.namespace(env));
    match commands::kubectl(&settings, env) {
        Ok(kubectl) if kubectl.is_available() => ui::kv("kubectl", "available"),
        Ok(_) => ui::kv("kubectl", &"not working".red().to_string()),
        Err(e) => ui::kv("kubectl", &format!("{e:#}").red().to_string()),
    }

    ui::section("Last deployment");
    match &last {
        Some(record) => {
            ui::kv("Fingerprint", &record.fingerprint[..8.min(record.fingerprint.len())]);
            ui::kv("Attempt", &record.attempt.to_string());
            ui::kv("Revision", &record.revision);
            ui::kv("Actor", &record.actor);
            ui::kv("Recorded", &record.recorded_at.to_rfc3339());
        }
        None => ui::dim("never deployed"),
    }

    println!();
    match (&snapshot, &last) {
        (Some(s), Some(r)) if s.fingerprint == r.fingerprint => {
            ui::success("Up to date: deploy would skip");
        }
        (Some(_), _) => ui::info(&format!("{}: deploy would apply", "Changed".yellow())),
        (None, _) => {}
    }

    if let Some(lease) = commands::lease_store()?.current(env)? {
        let state = if lease.is_expired(chrono::Utc::now()) {
            "expired".dimmed().to_string()
        } else {
            "active".yellow().to_string()
        };
        ui::info(&format!(
            "Lease held by {} until {} ({})",
            lease.owner,
            lease.expires_at.to_rfc3339(),
            state
        ));
    }

    Ok(())
}
