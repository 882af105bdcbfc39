//! Argument parsing and command dispatch.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use uuid::Uuid;

use crate::client::{AppContext, CliResult};
use crate::commands::{handle_delete, handle_get, handle_set, handle_update};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

/// Parses arguments, runs the command, and returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let request_id = Uuid::new_v4().to_string();
    match dispatch(cli, &request_id).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli, request_id: &str) -> CliResult<()> {
    let ctx = AppContext::new(cli.url, Duration::from_secs(cli.timeout), request_id)?;
    match cli.command {
        Command::Set(args) => handle_set(&ctx, &args).await,
        Command::Get(args) => handle_get(&ctx, &args).await,
        Command::Activate(args) => handle_update(&ctx, &args, true).await,
        Command::Deactivate(args) => handle_update(&ctx, &args, false).await,
        Command::Delete(args) => handle_delete(&ctx, &args).await,
    }
}

#[derive(Parser)]
#[command(name = "confvault", about = "Manage versioned service configuration")]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "CONFVAULT_URL",
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    url: Url,
    #[arg(
        long,
        global = true,
        env = "CONFVAULT_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    timeout: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a new active snapshot.
    Set(SetArgs),
    /// Print a snapshot's document.
    Get(GetArgs),
    /// Make a snapshot the active one.
    Activate(TargetArgs),
    /// Clear a snapshot's active flag.
    Deactivate(TargetArgs),
    /// Delete an inactive snapshot.
    Delete(DeleteArgs),
}

#[derive(Args)]
pub(crate) struct SetArgs {
    #[arg(long)]
    pub(crate) service: String,
    #[arg(long, help = "JSON object, or array of objects merged left to right")]
    pub(crate) data: String,
}

#[derive(Args)]
pub(crate) struct GetArgs {
    #[arg(long)]
    pub(crate) service: String,
    #[arg(long, help = "Snapshot version; omit for the active one")]
    pub(crate) version: Option<u32>,
    #[arg(long, help = "Print service, version, and active flag alongside the data")]
    pub(crate) extended: bool,
}

#[derive(Args)]
pub(crate) struct TargetArgs {
    #[arg(long)]
    pub(crate) service: String,
    #[arg(long, help = "Snapshot version; omit for the active one")]
    pub(crate) version: Option<u32>,
}

#[derive(Args)]
pub(crate) struct DeleteArgs {
    #[arg(long)]
    pub(crate) service: String,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub(crate) version: u32,
}

fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}
