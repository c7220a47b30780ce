use anyhow::{Context, Result};
use serde::Serialize;
use std::process;

use stride_core::service::TrackerService;
use stride_core::sync::{SyncOutcome, SyncReport};

use crate::config::{Config, SyncSettings};
use crate::remote::HttpRemote;

use super::helpers::{format_timestamp, print_json};

#[derive(Serialize)]
struct SyncOutput<'a> {
    #[serde(flatten)]
    outcome: SyncOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a SyncReport>,
}

pub(crate) async fn cmd_sync(
    svc: &TrackerService,
    owner_id: &str,
    settings: &SyncSettings,
    server: Option<&str>,
    json: bool,
) -> Result<()> {
    let server_url = server.or(settings.server_url.as_deref()).context(
        "No sync server configured. Pass --server, set STRIDE_SERVER_URL, or add [sync] server_url to config.toml",
    )?;
    let remote = HttpRemote::new(server_url, settings.api_key.clone())?;

    let result = svc.sync_engine(remote).sync(owner_id).await;

    if json {
        print_json(&SyncOutput {
            outcome: SyncOutcome::from(&result),
            report: result.as_ref().ok(),
        })?;
        if result.is_err() {
            process::exit(1);
        }
        return Ok(());
    }

    let report = result?;
    println!("Synced with {server_url}");
    println!(
        "  Pushed {} change(s), {} failed, {} skipped",
        report.pushed, report.failed, report.skipped
    );
    println!(
        "  Pulled {} new, {} updated, {} kept local",
        report.inserted, report.overwritten, report.discarded
    );
    if report.failed > 0 {
        eprintln!(
            "Some changes failed to push. Run `stride queue retry` then `stride sync` to try again."
        );
    }
    Ok(())
}

pub(crate) fn cmd_whoami(
    svc: &TrackerService,
    owner_id: &str,
    config: &Config,
    json: bool,
) -> Result<()> {
    let last_synced_at = svc.last_synced_at(owner_id)?;

    if json {
        return print_json(&serde_json::json!({
            "owner_id": owner_id,
            "database": config.db_path,
            "config_file": config.config_path,
            "server_url": config.sync.server_url,
            "last_synced_at": last_synced_at,
        }));
    }

    println!("Owner:       {owner_id}");
    println!("Database:    {}", config.db_path.display());
    println!("Config:      {}", config.config_path.display());
    println!(
        "Server:      {}",
        config.sync.server_url.as_deref().unwrap_or("(not configured)")
    );
    println!(
        "Last sync:   {}",
        last_synced_at.map_or_else(|| "never".to_string(), format_timestamp)
    );
    Ok(())
}
