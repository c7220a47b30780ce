mod commands;
mod config;
mod logging;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;

use crate::commands::{
    GoalArgs, GoalEditArgs, cmd_goal_add, cmd_goal_delete, cmd_goal_edit, cmd_goal_list,
    cmd_goal_show, cmd_progress_delete, cmd_progress_log, cmd_queue_list, cmd_queue_retry,
    cmd_stats, cmd_sync, cmd_whoami,
};
use crate::config::Config;
use stride_core::service::TrackerService;
use stride_core::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "stride",
    version,
    about = "A local-first goal tracker with offline sync",
    long_about = "Track personal goals and daily progress on this device. Changes are \
                  queued locally and pushed to a sync server with `stride sync`; \
                  any device can host that server with `stride serve`."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage goals
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Record daily progress toward a goal
    Progress {
        #[command(subcommand)]
        command: ProgressCommands,
    },
    /// Show dashboard statistics across all goals
    Stats {
        /// Day to treat as today (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or retry the outgoing change queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Push queued changes and pull remote updates
    Sync {
        /// Sync server URL (overrides config and STRIDE_SERVER_URL)
        #[arg(short, long)]
        server: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Host the sync server API backed by this device's database
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Show the owner id, database location and last sync time
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GoalCommands {
    /// Create a goal
    Add {
        /// Goal title
        title: String,
        /// Last day of the goal (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        end: String,
        /// First day of the goal (default: today)
        #[arg(long)]
        start: Option<String>,
        /// Total amount to reach by the end date
        #[arg(short, long)]
        target: Option<f64>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List goals with their progress
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a goal and its progress history
    Show {
        /// Goal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a goal's title, description, dates or target
    Edit {
        /// Goal ID
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(short, long)]
        target: Option<f64>,
        /// Remove the goal's target
        #[arg(long)]
        clear_target: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a goal
    Delete {
        /// Goal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProgressCommands {
    /// Log the value for a day, replacing any value already logged that day
    Log {
        /// Goal ID
        goal_id: String,
        /// Amount achieved
        value: f64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Optional note
        #[arg(short, long)]
        note: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a progress entry
    Delete {
        /// Progress entry ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List recorded changes, newest first
    List {
        /// Only show changes with this status: pending, synced, failed, skipped
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of changes to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move failed changes back to pending so the next sync pushes them
    Retry {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    logging::init(&config.log_filter);

    let svc = TrackerService::new(&config.db_path)?;
    let owner_id = match &config.sync.owner_id {
        Some(owner) => owner.clone(),
        None => svc.owner_id()?,
    };

    match cli.command {
        Commands::Goal { command } => match command {
            GoalCommands::Add {
                title,
                end,
                start,
                target,
                description,
                json,
            } => cmd_goal_add(
                &svc,
                &owner_id,
                GoalArgs {
                    title,
                    description,
                    start,
                    end,
                    target,
                },
                json,
            ),
            GoalCommands::List { json } => cmd_goal_list(&svc, &owner_id, json),
            GoalCommands::Show { id, json } => cmd_goal_show(&svc, &id, json),
            GoalCommands::Edit {
                id,
                title,
                description,
                start,
                end,
                target,
                clear_target,
                json,
            } => cmd_goal_edit(
                &svc,
                &id,
                GoalEditArgs {
                    title,
                    description,
                    start,
                    end,
                    target,
                    clear_target,
                },
                json,
            ),
            GoalCommands::Delete { id, json } => cmd_goal_delete(&svc, &id, json),
        },
        Commands::Progress { command } => match command {
            ProgressCommands::Log {
                goal_id,
                value,
                date,
                note,
                json,
            } => cmd_progress_log(&svc, &goal_id, value, date, note.as_deref(), json),
            ProgressCommands::Delete { id, json } => cmd_progress_delete(&svc, &id, json),
        },
        Commands::Stats { date, json } => cmd_stats(&svc, &owner_id, date, json),
        Commands::Queue { command } => match command {
            QueueCommands::List {
                status,
                limit,
                json,
            } => cmd_queue_list(&svc, status.as_deref(), limit, json),
            QueueCommands::Retry { json } => cmd_queue_retry(&svc, json),
        },
        Commands::Sync { server, json } => {
            cmd_sync(&svc, &owner_id, &config.sync, server.as_deref(), json).await
        }
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?)
            };
            let store: SqliteStore = svc.store().clone();
            server::start_server(store, port, &bind, api_key).await
        }
        Commands::Whoami { json } => cmd_whoami(&svc, &owner_id, &config, json),
    }
}
