use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use stride_core::models::ChangeStatus;
use stride_core::service::TrackerService;

use super::helpers::{format_timestamp, print_json};

pub(crate) fn cmd_queue_list(
    svc: &TrackerService,
    status: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let status: Option<ChangeStatus> = status.map(str::parse).transpose()?;
    let changes = svc.list_changes(status, limit)?;

    if json {
        return print_json(&changes);
    }
    if changes.is_empty() {
        eprintln!("Change queue is empty.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ChangeRow {
        #[tabled(rename = "#")]
        id: i64,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Entity")]
        entity: String,
        #[tabled(rename = "Op")]
        operation: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Last attempt")]
        last_attempt: String,
    }

    let rows: Vec<ChangeRow> = changes
        .iter()
        .map(|c| ChangeRow {
            id: c.id,
            kind: c.entity_kind.to_string(),
            entity: c.entity_id.clone(),
            operation: c.operation.to_string(),
            status: c.status.to_string(),
            last_attempt: c.last_attempt_at.map(format_timestamp).unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_queue_retry(svc: &TrackerService, json: bool) -> Result<()> {
    let requeued = svc.requeue_failed()?;

    if json {
        println!("{}", serde_json::json!({ "requeued": requeued }));
    } else if requeued == 0 {
        println!("No failed changes to retry.");
    } else {
        println!("Requeued {requeued} failed change(s). Run `stride sync` to push them.");
    }
    Ok(())
}
