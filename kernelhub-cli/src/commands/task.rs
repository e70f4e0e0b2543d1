//! Task command handlers
//!
//! Handles launching, inspecting, stopping tasks and reading their logs.

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use colored::*;
use futures::StreamExt;
use kernelhub_client::KernelhubClient;
use kernelhub_core::domain::log::{LogEntry, LogLevel};
use kernelhub_core::domain::task::{ExitReason, Task, TaskConfig, TaskKind, TaskState};
use kernelhub_core::dto::log::LogQuery;
use kernelhub_core::dto::task::{ContextFile, LaunchTask, ListTasksQuery, OrderBy, SortBy};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::config::Config;
use crate::id_resolver::resolve_task_id;
use crate::types::IdOrPrefix;

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// Launch a task
    Launch {
        /// notebook, command, shell or tensorboard
        kind: TaskKind,

        /// Owner recorded on the task
        #[arg(long, env = "KERNELHUB_OWNER")]
        owner: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Accelerator slots to request
        #[arg(long, default_value_t = 0)]
        slots: u32,

        /// Template the task was created from
        #[arg(long)]
        template: Option<String>,

        /// Environment variable for the task (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// Local file to place in the task directory (SRC or SRC:DEST, repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Stream the task's log after launching
        #[arg(short, long)]
        follow: bool,

        /// Command line, after `--`; defaults to the kind's entrypoint
        #[arg(last = true)]
        entrypoint: Vec<String>,
    },
    /// List tasks
    List {
        #[arg(long)]
        kind: Option<TaskKind>,

        #[arg(long)]
        state: Option<TaskState>,

        #[arg(long)]
        owner: Option<String>,

        /// id, start_time, description, state, owner or kind
        #[arg(long, default_value = "start_time", value_parser = parse_enum::<SortBy>)]
        sort_by: SortBy,

        /// asc or desc
        #[arg(long, default_value = "asc", value_parser = parse_enum::<OrderBy>)]
        order_by: OrderBy,

        /// First task shown; negative counts from the end
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Page size; 0 uses the master's maximum
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },
    /// Get task details
    Get {
        /// Task ID or unambiguous prefix
        id: IdOrPrefix,
    },
    /// Kill a task
    Kill {
        /// Task ID or unambiguous prefix
        id: IdOrPrefix,
    },
    /// Kill a task and remove it from the master
    Purge {
        /// Task ID or unambiguous prefix
        id: IdOrPrefix,
    },
    /// Print task logs
    Logs {
        /// Task ID or unambiguous prefix
        id: IdOrPrefix,

        /// Keep streaming until the task terminates
        #[arg(short, long)]
        follow: bool,

        /// Sequence id of the first entry
        #[arg(long, default_value_t = 0)]
        offset: i64,

        /// Maximum entries per batch; 0 means no cap
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },
}

/// Routes task subcommands to their handlers
pub async fn handle_task_command(command: TaskCommands, config: &Config) -> Result<()> {
    let client = KernelhubClient::new(&config.master_url);

    match command {
        TaskCommands::Launch {
            kind,
            owner,
            description,
            slots,
            template,
            env,
            files,
            follow,
            entrypoint,
        } => {
            let req = LaunchTask {
                kind,
                owner,
                template_name: template,
                config: TaskConfig {
                    description,
                    entrypoint,
                    slots,
                    environment: env.into_iter().collect(),
                },
                files: read_context_files(&files)?,
            };
            launch_task(&client, req, follow).await
        }
        TaskCommands::List {
            kind,
            state,
            owner,
            sort_by,
            order_by,
            offset,
            limit,
        } => {
            let query = ListTasksQuery {
                kind,
                state,
                owner,
                sort_by,
                order_by,
                offset,
                limit,
            };
            list_tasks(&client, &query).await
        }
        TaskCommands::Get { id } => get_task(&client, &id).await,
        TaskCommands::Kill { id } => kill_task(&client, &id).await,
        TaskCommands::Purge { id } => purge_task(&client, &id).await,
        TaskCommands::Logs {
            id,
            follow,
            offset,
            limit,
        } => {
            let id = resolve_task_id(&client, &id).await?;
            let query = LogQuery {
                offset,
                limit,
                follow,
            };
            print_logs(&client, id, query).await
        }
    }
}

async fn launch_task(client: &KernelhubClient, req: LaunchTask, follow: bool) -> Result<()> {
    let task = client
        .launch_task(req)
        .await
        .context("Failed to launch task")?;

    println!("{}", "✓ Task launched".green().bold());
    println!("  ID:    {}", task.id.to_string().cyan());
    println!("  Kind:  {}", task.kind);
    println!("  State: {}", colorize_state(task.state));

    if follow {
        println!();
        let query = LogQuery {
            follow: true,
            ..LogQuery::default()
        };
        print_logs(client, task.id, query).await?;
    }

    Ok(())
}

async fn list_tasks(client: &KernelhubClient, query: &ListTasksQuery) -> Result<()> {
    let page = client.list_tasks(query).await?;

    if page.tasks.is_empty() {
        println!("{}", "No tasks found.".yellow());
        return Ok(());
    }

    let p = page.pagination;
    println!(
        "{}",
        format!(
            "Showing tasks {}-{} of {}:",
            p.start_index + 1,
            p.end_index,
            p.total
        )
        .bold()
    );
    println!();
    for task in &page.tasks {
        print_task_summary(task);
    }

    Ok(())
}

async fn get_task(client: &KernelhubClient, id: &IdOrPrefix) -> Result<()> {
    let id = resolve_task_id(client, id).await?;
    let task = client.get_task(id).await?;

    print_task_details(&task);

    Ok(())
}

async fn kill_task(client: &KernelhubClient, id: &IdOrPrefix) -> Result<()> {
    let id = resolve_task_id(client, id).await?;
    client.kill_task(id).await?;

    println!("{} Kill requested for task {}", "✓".green(), id.to_string().cyan());

    Ok(())
}

async fn purge_task(client: &KernelhubClient, id: &IdOrPrefix) -> Result<()> {
    let id = resolve_task_id(client, id).await?;
    client.purge_task(id).await?;

    println!("{} Task {} purged", "✓".green(), id.to_string().cyan());

    Ok(())
}

async fn print_logs(client: &KernelhubClient, id: uuid::Uuid, query: LogQuery) -> Result<()> {
    let mut entries = client.stream_logs(id, query);
    let mut count = 0usize;

    while let Some(entry) = entries.next().await {
        let entry = entry.with_context(|| format!("Log stream of task {} failed", id))?;
        print_log_entry(&entry);
        count += 1;
    }

    if count == 0 && !query.follow {
        println!("{}", "No log entries.".yellow());
    }

    Ok(())
}

/// Print a task summary line
fn print_task_summary(task: &Task) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        task.id.to_string().dimmed(),
        task.description().bold()
    );
    println!(
        "    Kind: {}  Owner: {}  State: {}",
        task.kind,
        task.owner,
        colorize_state(task.state)
    );
    println!(
        "    Started: {}",
        task.started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed task information
fn print_task_details(task: &Task) {
    println!("{}", "Task Details:".bold());
    println!("  ID:          {}", task.id.to_string().cyan());
    println!("  Description: {}", task.description());
    println!("  Kind:        {}", task.kind);
    println!("  Owner:       {}", task.owner);
    println!("  State:       {}", colorize_state(task.state));
    if let Some(template) = &task.template_name {
        println!("  Template:    {}", template);
    }
    println!("  Slots:       {}", task.config.slots);
    println!(
        "  Started:     {}",
        task.started_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(terminated) = task.terminated_at {
        println!("  Terminated:  {}", terminated.format("%Y-%m-%d %H:%M:%S"));
        let duration = terminated.signed_duration_since(task.started_at);
        println!("  Duration:    {}s", duration.num_seconds());
    }

    if !task.config.entrypoint.is_empty() {
        println!("  Entrypoint:  {}", task.config.entrypoint.join(" "));
    }

    if !task.config.environment.is_empty() {
        println!("\n{}", "Environment:".bold());
        let mut vars: Vec<_> = task.config.environment.iter().collect();
        vars.sort();
        for (key, value) in vars {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(exit) = &task.exit {
        println!("\n{}", "Exit:".bold());
        let reason = format!("{:?}", exit.reason);
        let reason = match exit.reason {
            ExitReason::Completed if exit.exit_code == Some(0) => reason.green(),
            ExitReason::Completed => reason.yellow(),
            ExitReason::Killed => reason.dimmed(),
            ExitReason::Failed => reason.red(),
        };
        println!("  Reason:     {}", reason);
        if let Some(code) = exit.exit_code {
            println!("  Exit Code:  {}", code);
        }
        if let Some(message) = &exit.message {
            println!("  Message:    {}", message.red());
        }
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} {} [{}] {}",
        format!("{:>5}", log.id).dimmed(),
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

fn colorize_state(state: TaskState) -> ColoredString {
    let state_str = state.to_string();
    match state {
        TaskState::Starting => state_str.yellow(),
        TaskState::Running => state_str.cyan(),
        TaskState::Terminating => state_str.yellow(),
        TaskState::Terminated => state_str.dimmed(),
    }
}

/// Reads `SRC` or `SRC:DEST` file specs into context files
fn read_context_files(specs: &[String]) -> Result<Vec<ContextFile>> {
    specs
        .iter()
        .map(|spec| {
            let (src, dest) = split_file_spec(spec)?;
            let content = std::fs::read_to_string(src)
                .with_context(|| format!("Failed to read context file: {}", src))?;
            Ok(ContextFile {
                path: dest,
                content,
            })
        })
        .collect()
}

fn split_file_spec(spec: &str) -> Result<(&str, String)> {
    let (src, dest) = match spec.split_once(':') {
        Some((src, dest)) => (src, dest.to_string()),
        None => {
            let name = Path::new(spec)
                .file_name()
                .ok_or_else(|| anyhow!("'{}' does not name a file", spec))?;
            (spec, name.to_string_lossy().into_owned())
        }
    };

    if src.is_empty() || dest.is_empty() {
        return Err(anyhow!("invalid file spec '{}', expected SRC or SRC:DEST", spec));
    }

    Ok((src, dest))
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parses a snake_case serde enum from its wire name
fn parse_enum<T: DeserializeOwned>(s: &str) -> std::result::Result<T, String> {
    let name = s.trim().to_ascii_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(name))
        .map_err(|_| format!("unknown value '{}'", s))
}
