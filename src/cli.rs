use clap::{Args, Parser, Subcommand};

use crate::famly::client::DEFAULT_BASE_URL;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "famly-fetch-rs",
    version,
    about = "Download photos of your children from Famly"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download new photos from the selected feeds
    Sync(SyncArgs),

    /// Log in and list the children on the account
    Children(AuthArgs),

    /// Show how many items are remembered per account
    Status(StateArgs),

    /// Delete the seen-set so the next sync starts from scratch
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Famly login email
    #[arg(short = 'u', long, env = "FAMLY_EMAIL")]
    pub email: String,

    /// Famly password (prompted for when not given).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the FAMLY_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "FAMLY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Famly app base URL
    #[arg(long, env = "FAMLY_APP_BASE", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// JSON file remembering already downloaded items
    #[arg(long, default_value = "~/.famly_fetcher/state.json")]
    pub state_file: String,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub state: StateArgs,

    /// Local directory for downloads
    #[arg(short = 'd', long, default_value = "~/Pictures/FamlyPhotos")]
    pub directory: String,

    /// Feed(s) to read: tagged, journey, notes, messages (repeatable or comma-separated)
    #[arg(short = 's', long = "source", default_value = "tagged")]
    pub sources: Vec<String>,

    /// Only download photos of the child with this name
    #[arg(short = 'c', long)]
    pub child: Option<String>,

    /// Skip photos created before this ISO date, datetime or interval
    /// (e.g. 2025-01-02, 2025-01-02T14:30:00, 20d), or "all"
    #[arg(long, default_value = "30d")]
    pub since: String,

    /// Download items even if a previous run already fetched them
    #[arg(long)]
    pub no_incremental: bool,

    /// Max retries per download (0 = no retries)
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}
