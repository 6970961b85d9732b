use anyhow::Result;
use ledger::retention::{self, PruneReport, select_expired};
use ledger::{ArtifactKind, ArtifactStore, AuditStore, Environment};

use crate::Context;
use crate::cli::PruneArgs;
use crate::cluster::KubeArtifacts;
use crate::commands;
use crate::ui;

pub fn run(ctx: &Context, args: PruneArgs) -> Result<()> {
    let settings = ctx.settings()?;
    let env = args.env;
    let artifacts = KubeArtifacts::new(commands::kubectl(&settings, env)?);
    let audit = commands::audit_store()?;

    if args.dry_run {
        ui::header(&format!("Would prune {env}"));
        for kind in [ArtifactKind::Snapshot, ArtifactKind::Unit] {
            let expired = select_expired(artifacts.list(env, kind)?, settings.retention);
            list_expired(kind, expired.iter().map(|a| a.name.as_str()));
        }
        let records = audit.list_recent(env)?;
        let expired: Vec<_> = records
            .into_iter()
            .map(|r| ledger::Artifact {
                name: r.id,
                kind: ArtifactKind::Record,
                environment: env,
                created_at: r.recorded_at,
            })
            .collect();
        let expired = select_expired(expired, settings.audit_retention);
        list_expired(ArtifactKind::Record, expired.iter().map(|a| a.name.as_str()));
        return Ok(());
    }

    let mut total = PruneReport::default();
    for kind in [ArtifactKind::Snapshot, ArtifactKind::Unit] {
        total.merge(retention::prune(&artifacts, env, kind, settings.retention)?);
    }
    total.merge(retention::prune_records(&audit, env, settings.audit_retention)?);

    print_report(env, &total);
    if !total.is_clean() {
        anyhow::bail!("{} artifact(s) could not be deleted", total.failed.len());
    }
    Ok(())
}

fn list_expired<'a>(kind: ArtifactKind, names: impl Iterator<Item = &'a str>) {
    let names: Vec<_> = names.collect();
    ui::section(&format!("{kind} ({})", names.len()));
    if names.is_empty() {
        ui::dim("nothing to delete");
    }
    for name in names {
        ui::dim(name);
    }
}

fn print_report(env: Environment, report: &PruneReport) {
    for name in &report.deleted {
        ui::dim(&format!("deleted {name}"));
    }
    for (name, error) in &report.failed {
        ui::error(&format!("{name}: {error}"));
    }
    ui::success(&format!(
        "{env}: {} deleted, {} kept",
        report.deleted.len(),
        report.kept
    ));
}
