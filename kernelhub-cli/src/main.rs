//! KernelHub CLI
//!
//! `kh` launches notebooks, shells, tensorboards and one-off commands on a
//! KernelHub master, and follows their logs. Task ids may be abbreviated to
//! any unique prefix.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "kh")]
#[command(about = "Launch and observe KernelHub tasks")]
#[command(
    long_about = "Launch and observe KernelHub tasks.\n\n\
    Every command talks to one master over HTTP. `kh task logs -f` keeps \
    printing entries until the task terminates or is purged."
)]
struct Cli {
    /// Base URL of the KernelHub master, e.g. http://hub:8080
    #[arg(
        long,
        env = "KERNELHUB_MASTER_URL",
        default_value = "http://localhost:8080",
        value_parser = parse_master_url
    )]
    master_url: String,

    #[command(subcommand)]
    command: Commands,
}

/// Accepts http(s) URLs only; a trailing slash is dropped
fn parse_master_url(raw: &str) -> Result<String, String> {
    let url = raw.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("'{}' is not an http:// or https:// URL", raw));
    }
    Ok(url.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        master_url: cli.master_url,
    };

    handle_command(cli.command, &config).await
}
