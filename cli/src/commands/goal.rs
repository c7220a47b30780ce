use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::models::{GoalWithProgress, NewGoal, UpdateGoal};
use stride_core::service::TrackerService;

use super::helpers::{
    exit_not_found, format_amount, parse_date, parse_optional_date, print_json, truncate,
};

pub(crate) struct GoalArgs {
    pub title: String,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: String,
    pub target: Option<f64>,
}

pub(crate) struct GoalEditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub target: Option<f64>,
    pub clear_target: bool,
}

fn target_label(view: &GoalWithProgress) -> String {
    match view.goal.target {
        Some(t) => format!(
            "{} / {} ({:.0}%)",
            format_amount(view.total_progress),
            format_amount(t),
            view.completion_percentage
        ),
        None => format_amount(view.total_progress),
    }
}

fn print_goal_summary(view: &GoalWithProgress) {
    let goal = &view.goal;
    println!("{} ({})", goal.title, goal.id);
    if !goal.description.is_empty() {
        println!("  {}", goal.description);
    }
    println!(
        "  {} → {}{}",
        goal.start_date.format("%Y-%m-%d"),
        goal.end_date.format("%Y-%m-%d"),
        if view.is_active { "  (active)" } else { "" }
    );
    println!("  Progress: {}", target_label(view));
    println!(
        "  Streak: {} day(s), {} day(s) remaining",
        view.current_streak, view.days_remaining
    );
}

pub(crate) fn cmd_goal_add(
    svc: &TrackerService,
    owner_id: &str,
    args: GoalArgs,
    json: bool,
) -> Result<()> {
    let start_date = parse_date(args.start)?;
    let end_date = parse_date(Some(args.end))?;
    let goal = svc.create_goal(&NewGoal {
        owner_id: owner_id.to_string(),
        title: args.title,
        description: args.description.unwrap_or_default(),
        start_date,
        end_date,
        target: args.target,
    })?;

    if json {
        print_json(&goal)?;
    } else {
        println!("Created goal \"{}\" ({})", goal.title, goal.id);
    }
    Ok(())
}

pub(crate) fn cmd_goal_list(svc: &TrackerService, owner_id: &str, json: bool) -> Result<()> {
    let goals = svc.list_goals(owner_id, Local::now().date_naive())?;

    if json {
        return print_json(&goals);
    }
    if goals.is_empty() {
        eprintln!("No goals yet. Use `stride goal add` to create one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct GoalRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Ends")]
        ends: String,
        #[tabled(rename = "Progress")]
        progress: String,
        #[tabled(rename = "Streak")]
        streak: i64,
        #[tabled(rename = "Days left")]
        days_left: i64,
        #[tabled(rename = "Active")]
        active: String,
    }

    let rows: Vec<GoalRow> = goals
        .iter()
        .map(|v| GoalRow {
            id: v.goal.id.clone(),
            title: truncate(&v.goal.title, 30),
            ends: v.goal.end_date.format("%Y-%m-%d").to_string(),
            progress: target_label(v),
            streak: v.current_streak,
            days_left: v.days_remaining,
            active: if v.is_active { "yes" } else { "no" }.to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_goal_show(svc: &TrackerService, id: &str, json: bool) -> Result<()> {
    let Some((view, entries)) = svc.goal_detail(id, Local::now().date_naive())? else {
        exit_not_found(&format!("Goal {id} not found"), json);
    };

    if json {
        return print_json(&serde_json::json!({ "goal": view, "progress": entries }));
    }

    print_goal_summary(&view);
    if entries.is_empty() {
        println!("\nNo progress logged yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Note")]
        note: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: e.id.clone(),
            date: e.date.format("%Y-%m-%d").to_string(),
            value: format_amount(e.value),
            note: truncate(&e.note, 40),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("\n{table}");
    Ok(())
}

fn build_update(args: GoalEditArgs) -> Result<UpdateGoal> {
    if args.target.is_some() && args.clear_target {
        bail!("--target and --clear-target cannot be used together");
    }
    let target = if args.clear_target {
        Some(None)
    } else {
        args.target.map(Some)
    };
    let start_date: Option<NaiveDate> = parse_optional_date(args.start)?;
    let update = UpdateGoal {
        title: args.title,
        description: args.description,
        start_date,
        end_date: parse_optional_date(args.end)?,
        target,
    };
    if update.is_empty() {
        bail!(
            "Nothing to update. Provide at least one of --title, --description, --start, --end, --target or --clear-target"
        );
    }
    Ok(update)
}

pub(crate) fn cmd_goal_edit(
    svc: &TrackerService,
    id: &str,
    args: GoalEditArgs,
    json: bool,
) -> Result<()> {
    let update = build_update(args)?;
    let Some(goal) = svc.update_goal(id, &update)? else {
        exit_not_found(&format!("Goal {id} not found"), json);
    };

    if json {
        print_json(&goal)?;
    } else {
        println!("Updated goal \"{}\" ({})", goal.title, goal.id);
    }
    Ok(())
}

pub(crate) fn cmd_goal_delete(svc: &TrackerService, id: &str, json: bool) -> Result<()> {
    if !svc.delete_goal(id)? {
        exit_not_found(&format!("Goal {id} not found"), json);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted goal {id}");
    }
    Ok(())
}
