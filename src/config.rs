use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};

use crate::cli::{AuthArgs, SyncArgs};
use crate::download::DownloadConfig;
use crate::famly::SourceKind;
use crate::retry::RetryConfig;

/// Upper bound for the exponential retry backoff.
const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Login settings shared by every command that talks to Famly.
pub struct Credentials {
    pub email: String,
    pub password: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Credentials {
    pub fn from_cli(args: AuthArgs) -> anyhow::Result<Self> {
        Ok(Self {
            email: args.email.trim().to_string(),
            password: args.password,
            base_url: normalize_base_url(&args.base_url)?,
            timeout_secs: args.timeout,
        })
    }
}

/// Settings for a `sync` run.
#[derive(Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub directory: PathBuf,
    pub state_file: PathBuf,
    pub sources: Vec<SourceKind>,
    pub child: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub retry: RetryConfig,
    pub incremental: bool,
    pub no_progress_bar: bool,
}

impl Config {
    pub fn from_cli(args: SyncArgs) -> anyhow::Result<Self> {
        let sources = parse_sources(&args.sources);
        let child = args
            .child
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if child.is_some() && sources.iter().any(|k| !k.is_child_scoped()) {
            tracing::warn!("Message photos carry no child name and are skipped when --child is set");
        }

        Ok(Self {
            credentials: Credentials::from_cli(args.auth)?,
            directory: expand_tilde(&args.directory),
            state_file: expand_tilde(&args.state.state_file),
            sources,
            child,
            since: parse_since(&args.since)?,
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: MAX_RETRY_DELAY_SECS.max(args.retry_delay),
            },
            incremental: !args.no_incremental,
            no_progress_bar: args.no_progress_bar,
        })
    }

    /// The part of the config the download engine needs.
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            directory: self.directory.clone(),
            since: self.since,
            child: self.child.clone(),
            incremental: self.incremental,
            user_key: self.credentials.email.clone(),
            sources: self.sources.clone(),
            retry: self.retry.clone(),
            no_progress_bar: self.no_progress_bar,
        }
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Strip trailing slashes and reject anything that is not an http(s) URL.
fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| anyhow::anyhow!("Invalid base URL '{}': {}", raw, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Base URL must be http or https, got '{}'", raw);
    }
    Ok(trimmed.to_string())
}

/// Resolve `--source` values (repeatable, comma-separated) to feeds, in order
/// and without duplicates. Unknown names are dropped with a warning, so they
/// contribute nothing to the run.
fn parse_sources(values: &[String]) -> Vec<SourceKind> {
    let mut kinds: Vec<SourceKind> = Vec::new();
    for name in values.iter().flat_map(|v| v.split(',')) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match SourceKind::parse(name) {
            Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
            Some(_) => {}
            None => tracing::warn!("Unknown source kind '{}', nothing to fetch for it", name),
        }
    }
    kinds
}

/// Parse `--since`: `all` disables the date filter, anything else goes
/// through [`parse_date_or_interval`].
pub(crate) fn parse_since(s: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    parse_date_or_interval(s).map(Some)
}

/// Parse a human-friendly date expression into a UTC timestamp:
/// - Relative interval: `"20d"` (20 days ago from now)
/// - ISO date: `"2025-01-02"` (midnight local time)
/// - ISO datetime: `"2025-01-02T14:30:00"` (local time) or with an offset
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if let Some(days) = s.strip_suffix('d').and_then(|d| d.parse::<u32>().ok()) {
        return Ok(Utc::now() - chrono::Duration::days(i64::from(days)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let local = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest());
    match local {
        Some(dt) => Ok(dt.with_timezone(&Utc)),
        None => anyhow::bail!(
            "Cannot parse '{}' as a date. Expected ISO date (2025-01-02), \
             datetime (2025-01-02T14:30:00), interval (20d) or 'all'",
            s
        ),
    }
}
