use anyhow::Result;
use colored::Colorize;
use ledger::Environment;
use snapshot::Snapshot;

use crate::Context;
use crate::cli::HashArgs;
use crate::ui;

pub fn run(ctx: &Context, args: HashArgs) -> Result<()> {
    let settings = ctx.settings()?;
    let snapshot = capture(&settings, args.env)?;

    if args.short {
        println!("{}", snapshot.fingerprint);
        return Ok(());
    }

    ui::header(&format!("Configuration for {}", args.env));
    ui::kv("Fingerprint", &snapshot.fingerprint);
    ui::kv("Files", &snapshot.files.len().to_string());
    ui::kv("Size", &ui::format_size(snapshot.total_size()));

    ui::section("Files");
    for file in &snapshot.files {
        println!(
            "  {}  {}",
            file.digest[..16.min(file.digest.len())].dimmed(),
            file.name
        );
    }

    let warnings = snapshot::lint::check(&snapshot);
    if !warnings.is_empty() {
        ui::section("Warnings");
        for warning in &warnings {
            ui::warn(&warning.to_string());
        }
    }

    Ok(())
}

/// Capture the configuration tree of an environment
pub fn capture(settings: &crate::config::Settings, env: Environment) -> Result<Snapshot> {
    let dir = settings.configs_path(env);
    Ok(Snapshot::capture(
        env.as_str(),
        &dir,
        &settings.capture_options(),
    )?)
}
