use anyhow::Result;

use stride_core::service::TrackerService;

use super::helpers::{format_amount, parse_date, print_json};

pub(crate) fn cmd_stats(
    svc: &TrackerService,
    owner_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let today = parse_date(date)?;
    let stats = svc.dashboard(owner_id, today)?;

    if json {
        return print_json(&stats);
    }

    println!("Stats for {}", today.format("%Y-%m-%d"));
    println!("  Goals:           {}", stats.total_goals);
    println!("  Active:          {}", stats.active_goals);
    println!("  Completed:       {}", stats.completed_goals);
    println!("  Logged today:    {}", stats.today_progress_count);
    println!("  Longest streak:  {} day(s)", stats.longest_streak);
    println!("  Total progress:  {}", format_amount(stats.total_progress));
    Ok(())
}
