//! Download engine: pulls records one at a time from each requested feed,
//! filters them, downloads what is left, and records successes in the
//! seen-set. Strictly sequential so a cancelled run never leaves half-tracked
//! work behind.

pub mod error;
pub mod exif;
pub mod file;
pub mod paths;

use std::fs::FileTimes;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use self::error::DownloadError;
use self::exif::EmbedOutcome;
use crate::famly::{sources, FamlyError, PhotoRecord, Session, SourceKind};
use crate::retry::RetryConfig;
use crate::state::{SeenStore, StateError};

/// Headroom added to the running item count to estimate the total.
const TOTAL_HINT_HEADROOM: u64 = 25;

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) directory: PathBuf,
    /// Inclusive lower bound on `created_at`; `None` downloads everything.
    pub(crate) since: Option<DateTime<Utc>>,
    pub(crate) child: Option<String>,
    pub(crate) incremental: bool,
    /// Seen-set namespace, normally the login email.
    pub(crate) user_key: String,
    pub(crate) sources: Vec<SourceKind>,
    pub(crate) retry: RetryConfig,
    pub(crate) no_progress_bar: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// A feed could not be read; work done before the failure still counts.
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub downloaded: u64,
    pub skipped: u64,
    pub errored: u64,
    /// Estimated total; only ever grows.
    pub total_hint: u64,
}

impl RunStats {
    fn observe(&mut self, pulled: u64) -> u64 {
        self.total_hint = self.total_hint.max(pulled + TOTAL_HINT_HEADROOM);
        self.total_hint
    }

    fn processed(&self) -> u64 {
        self.downloaded + self.skipped + self.errored
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub stats: RunStats,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    BeforeSince,
    OtherChild,
    AlreadySeen,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            SkipReason::BeforeSince => "older than the date filter",
            SkipReason::OtherChild => "not the selected child",
            SkipReason::AlreadySeen => "already downloaded",
        }
    }
}

fn skip_reason(
    record: &PhotoRecord,
    key: &str,
    config: &DownloadConfig,
    store: &SeenStore,
) -> Option<SkipReason> {
    if config.since.is_some_and(|since| record.created_at < since) {
        return Some(SkipReason::BeforeSince);
    }
    if let Some(child) = &config.child {
        if record.child_label.as_deref() != Some(child.as_str()) {
            return Some(SkipReason::OtherChild);
        }
    }
    if config.incremental && store.seen(&config.user_key, key) {
        return Some(SkipReason::AlreadySeen);
    }
    None
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(TOTAL_HINT_HEADROOM);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}~ {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// A file written by [`fetch_record`].
#[derive(Debug)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
    pub metadata: EmbedOutcome,
}

/// Download one record into `directory`, then stamp its mtime and capture
/// metadata. Only the download itself can fail; metadata problems are
/// logged and reported in [`Downloaded::metadata`].
pub async fn fetch_record(
    client: &Client,
    record: &PhotoRecord,
    directory: &Path,
    retry_config: &RetryConfig,
) -> Result<Downloaded, DownloadError> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|e| DownloadError::disk(directory, e))?;
    let path = paths::local_download_path(directory, &record.filename);

    let bytes = file::download_file(client, &record.url, &path, retry_config).await?;
    if bytes == 0 {
        tracing::warn!("Downloaded an empty file: {}", path.display());
    }

    let exif_path = path.clone();
    let created_at = record.created_at;
    let caption = record.text.clone();
    let metadata = tokio::task::spawn_blocking(move || {
        exif::embed_capture_metadata(&exif_path, &created_at, caption.as_deref())
    })
    .await
    .unwrap_or_else(|_| {
        EmbedOutcome::Failed(error::MetadataError::Panicked(path.clone()))
    });
    if let EmbedOutcome::Failed(e) = &metadata {
        tracing::warn!("Keeping {} without capture metadata: {}", path.display(), e);
    }

    // After the EXIF rewrite, which would otherwise bump the mtime.
    let mtime_path = path.clone();
    let ts = record.created_at.timestamp();
    match tokio::task::spawn_blocking(move || set_file_mtime(&mtime_path, ts)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Could not set mtime on {}: {}", path.display(), e),
        Err(e) => tracing::warn!("mtime task failed for {}: {}", path.display(), e),
    }

    Ok(Downloaded {
        path,
        bytes,
        metadata,
    })
}

enum StreamEnd {
    Exhausted,
    Cancelled,
}

/// Everything one feed needs while being drained.
struct Drain<'a> {
    client: &'a Client,
    config: &'a DownloadConfig,
    store: &'a mut SeenStore,
    stats: &'a mut RunStats,
    pulled: u64,
    pb: &'a ProgressBar,
    token: &'a CancellationToken,
}

impl Drain<'_> {
    /// Process `records` one at a time until the feed ends, the token is
    /// cancelled, or a feed-level error occurs. Per-item failures are counted
    /// and skipped over.
    async fn run<S>(&mut self, kind: SourceKind, mut records: S) -> Result<StreamEnd, FamlyError>
    where
        S: Stream<Item = Result<PhotoRecord, FamlyError>> + Unpin,
    {
        loop {
            if self.token.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }
            let Some(item) = records.next().await else {
                return Ok(StreamEnd::Exhausted);
            };
            if self.token.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }

            self.pulled += 1;
            self.pb.set_length(self.stats.observe(self.pulled));

            let record = match item {
                Ok(record) => record,
                // Includes records without a parseable timestamp: they cannot
                // be date-filtered or named, so they count as errored instead
                // of slipping past --since.
                Err(e) if e.is_item_scoped() => {
                    self.pb.suspend(|| tracing::warn!("Skipping {} item: {}", kind, e));
                    self.stats.errored += 1;
                    self.pb.inc(1);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.process(kind, &record).await;
            self.pb.inc(1);
        }
    }

    async fn process(&mut self, kind: SourceKind, record: &PhotoRecord) {
        let key = record.seen_key(kind);
        if let Some(reason) = skip_reason(record, &key, self.config, self.store) {
            tracing::debug!("Skipping {}: {}", record.filename, reason.as_str());
            self.stats.skipped += 1;
            return;
        }

        self.pb.set_message(record.filename.clone());
        match fetch_record(self.client, record, &self.config.directory, &self.config.retry).await {
            Ok(downloaded) => {
                self.pb.suspend(|| {
                    tracing::debug!(
                        "Saved {} ({} bytes)",
                        downloaded.path.display(),
                        downloaded.bytes
                    );
                    if let EmbedOutcome::Embedded(container) = &downloaded.metadata {
                        tracing::debug!("Capture time written into {:?} container", container);
                    }
                });
                self.store.mark(&self.config.user_key, &key);
                self.stats.downloaded += 1;
            }
            Err(e) => {
                self.pb
                    .suspend(|| tracing::error!("Download failed: {}: {}", record.filename, e));
                self.stats.errored += 1;
            }
        }
    }
}

/// Entry point for the download engine.
///
/// Runs each configured feed in order, then saves the seen-set exactly once
/// whatever the outcome. Only a failed save is returned as an error; feed
/// failures are reported through [`RunSummary::outcome`].
pub async fn download_photos(
    session: &Session,
    client: &Client,
    store: &mut SeenStore,
    config: &DownloadConfig,
    shutdown_token: &CancellationToken,
) -> Result<RunSummary, StateError> {
    let started = Instant::now();
    let pb = create_progress_bar(config.no_progress_bar);
    let mut stats = RunStats::default();
    let outcome = drain_sources(session, client, store, config, &mut stats, &pb, shutdown_token).await;
    pb.finish_and_clear();

    store.save().await?;
    tracing::debug!(
        "Seen-set for {} holds {} keys in {}",
        config.user_key,
        store.count(&config.user_key),
        store.path().display()
    );

    let summary = RunSummary {
        outcome,
        stats,
        elapsed: started.elapsed(),
    };
    log_summary(&summary, &config.directory);
    Ok(summary)
}

async fn drain_sources(
    session: &Session,
    client: &Client,
    store: &mut SeenStore,
    config: &DownloadConfig,
    stats: &mut RunStats,
    pb: &ProgressBar,
    token: &CancellationToken,
) -> RunOutcome {
    if token.is_cancelled() {
        return RunOutcome::Cancelled;
    }
    if let Err(e) = sources::check_children(session, &config.sources, config.child.as_deref()).await {
        pb.suspend(|| tracing::error!("Cannot start downloads: {}", e));
        return RunOutcome::Failed(e.to_string());
    }

    let mut drain = Drain {
        client,
        config,
        store,
        stats,
        pulled: 0,
        pb,
        token,
    };

    for &kind in &config.sources {
        if token.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        pb.suspend(|| tracing::info!("Fetching {} photos", kind));

        let result = match sources::photo_stream(session, kind, config.child.as_deref()).await {
            Ok(records) => drain.run(kind, records).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(StreamEnd::Exhausted) => {}
            Ok(StreamEnd::Cancelled) => {
                pb.suspend(|| tracing::info!("Shutdown requested, stopping downloads"));
                return RunOutcome::Cancelled;
            }
            Err(e) => {
                pb.suspend(|| tracing::error!("Reading {} feed failed: {}", kind, e));
                return RunOutcome::Failed(e.to_string());
            }
        }
    }
    RunOutcome::Completed
}

fn log_summary(summary: &RunSummary, directory: &Path) {
    let stats = &summary.stats;
    tracing::info!("── Summary ──");
    match &summary.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Cancelled => tracing::info!("  Interrupted before all feeds were read"),
        RunOutcome::Failed(reason) => tracing::info!("  Stopped early: {}", reason),
    }
    tracing::info!(
        "  {} downloaded, {} skipped, {} errored, {} total",
        stats.downloaded,
        stats.skipped,
        stats.errored,
        stats.processed()
    );
    tracing::info!("  destination: {}", directory.display());
    tracing::info!("  elapsed: {}", format_duration(summary.elapsed));
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let (hours, mins, secs) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    match (hours, mins) {
        (0, 0) => format!("{secs}s"),
        (0, _) => format!("{mins}m {secs:02}s"),
        _ => format!("{hours}h {mins:02}m {secs:02}s"),
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Dates before 1970 are clamped to the epoch.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = u64::try_from(timestamp)
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_times(times)
}
