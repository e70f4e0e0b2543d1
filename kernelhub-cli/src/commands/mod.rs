//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod task;

pub use task::TaskCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Task { command } => task::handle_task_command(command, config).await,
    }
}
