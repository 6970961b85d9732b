use anyhow::Result;
use chrono::Utc;
use ledger::{Environment, LeaseStore};

use crate::Context;
use crate::commands;
use crate::ui;

pub fn show(_ctx: &Context, env: Environment) -> Result<()> {
    match commands::lease_store()?.current(env)? {
        Some(lease) => {
            ui::header(&format!("Lease on {env}"));
            ui::kv("Owner", &lease.owner);
            ui::kv("Acquired", &lease.acquired_at.to_rfc3339());
            ui::kv("Expires", &lease.expires_at.to_rfc3339());
            if lease.is_expired(Utc::now()) {
                ui::dim("expired; the next deploy will take it over");
            }
        }
        None => ui::info(&format!("No lease on {env}")),
    }
    Ok(())
}

pub fn release(_ctx: &Context, env: Environment) -> Result<()> {
    match commands::lease_store()?.force_release(env)? {
        Some(lease) => {
            if !lease.is_expired(Utc::now()) {
                ui::warn(&format!(
                    "Lease was still active; {} may still be running",
                    lease.owner
                ));
            }
            ui::success(&format!("Released lease on {env} held by {}", lease.owner));
        }
        None => ui::info(&format!("No lease on {env}")),
    }
    Ok(())
}
