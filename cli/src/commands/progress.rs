use anyhow::Result;

use stride_core::service::TrackerService;

use super::helpers::{exit_not_found, format_amount, parse_date, print_json};

pub(crate) fn cmd_progress_log(
    svc: &TrackerService,
    goal_id: &str,
    value: f64,
    date: Option<String>,
    note: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let entry = svc.log_progress(goal_id, date, value, note)?;

    if json {
        print_json(&entry)?;
    } else {
        println!(
            "Logged {} for {} ({})",
            format_amount(entry.value),
            entry.date.format("%Y-%m-%d"),
            entry.id
        );
        if !entry.note.is_empty() {
            println!("  Note: {}", entry.note);
        }
    }
    Ok(())
}

pub(crate) fn cmd_progress_delete(svc: &TrackerService, id: &str, json: bool) -> Result<()> {
    if !svc.delete_progress(id)? {
        exit_not_found(&format!("Progress entry {id} not found"), json);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted progress entry {id}");
    }
    Ok(())
}
