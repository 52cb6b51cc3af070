//! famly-fetch-rs: download the photos a nursery shares through Famly.
//!
//! Logs in with email and password, walks the tagged-photo, learning
//! journey, notes and message feeds, and saves every image not fetched
//! before, stamped with its capture time. A small JSON seen-set makes
//! repeat runs incremental.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod famly;
pub mod retry;
mod shutdown;
mod state;
mod types;

use std::io::Write as _;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Credentials;
use download::RunOutcome;
use famly::{FamlyClient, Session};
use state::SeenStore;

/// Prompt for the password on the terminal unless one was supplied.
fn resolve_password(credentials: &Credentials) -> anyhow::Result<String> {
    match &credentials.password {
        Some(pw) if !pw.is_empty() => Ok(pw.clone()),
        _ => {
            let prompt = format!("Famly password for {}: ", credentials.email);
            let pw = tokio::task::block_in_place(|| rpassword::prompt_password(prompt))?;
            Ok(pw)
        }
    }
}

async fn login(credentials: &Credentials) -> anyhow::Result<Session> {
    let password = resolve_password(credentials)?;
    tracing::info!("Logging in to {} as {}", credentials.base_url, credentials.email);
    let client = FamlyClient::login(
        &credentials.base_url,
        &credentials.email,
        &password,
        credentials.timeout_secs,
    )
    .await?;
    Ok(Session::new(Box::new(client)))
}

/// Run the sync command.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_cli(args)?;
    tracing::debug!(?config, "Starting famly-fetch-rs");
    if config.sources.is_empty() {
        tracing::warn!("No known sources selected, nothing to do");
        return Ok(());
    }

    let session = login(&config.credentials).await?;
    let download_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.credentials.timeout_secs))
        .build()?;

    let mut store = SeenStore::load(&config.state_file).await;
    let shutdown_token = shutdown::install_signal_handler();

    let summary = download::download_photos(
        &session,
        &download_client,
        &mut store,
        &config.download_config(),
        &shutdown_token,
    )
    .await?;

    match summary.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => {
            tracing::info!("Stopped on request; progress has been saved");
            Ok(())
        }
        RunOutcome::Failed(reason) => anyhow::bail!("Sync stopped early: {}", reason),
    }
}

/// Run the children command.
async fn run_children(args: cli::AuthArgs) -> anyhow::Result<()> {
    let credentials = Credentials::from_cli(args)?;
    let session = login(&credentials).await?;
    let children = session.children().await?;

    println!("Children on this account:");
    for child in children {
        match &child.label {
            Some(label) => println!("  {:<20} {}", label, child.id),
            None => println!("  {:<20} {}", "(no name)", child.id),
        }
    }
    Ok(())
}

/// Run the status command.
async fn run_status(args: cli::StateArgs) -> anyhow::Result<()> {
    let state_path = config::expand_tilde(&args.state_file);
    if !state_path.exists() {
        println!("No state file found at {}", state_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let store = SeenStore::load(&state_path).await;
    println!("State file: {}", state_path.display());
    println!();

    let mut any = false;
    for (user, count) in store.user_counts() {
        println!("  {:<40} {:>6} seen (cap {})", user, count, state::SEEN_CAP);
        any = true;
    }
    if !any {
        println!("  (empty)");
    }
    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let state_path = config::expand_tilde(&args.state.state_file);
    if !state_path.exists() {
        println!("No state file found at {}", state_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will forget every previously downloaded item recorded in:");
        println!("  {}", state_path.display());
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if state::store::remove_state_file(&state_path).await? {
        println!("State file deleted.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Children(args) => run_children(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}
