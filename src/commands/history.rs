use anyhow::Result;
use colored::Colorize;
use ledger::AuditStore;
use ledger::record::sort_recent_first;

use crate::Context;
use crate::cli::HistoryArgs;
use crate::commands;
use crate::ui;

pub fn run(_ctx: &Context, args: HistoryArgs) -> Result<()> {
    let store = commands::audit_store()?;
    let mut records = store.list_recent(args.env)?;
    sort_recent_first(&mut records);
    records.truncate(args.limit);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    ui::header(&format!("Deployments to {}", args.env));
    if records.is_empty() {
        ui::dim("No deployments recorded");
        return Ok(());
    }

    for record in &records {
        let revision = &record.revision[..12.min(record.revision.len())];
        println!(
            "  {}  {}  {}  {}  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.fingerprint[..8.min(record.fingerprint.len())].bold(),
            record.outcome,
            revision.cyan(),
            record.actor
        );
        log::debug!("  attempt {}", record.attempt);
    }

    Ok(())
}
