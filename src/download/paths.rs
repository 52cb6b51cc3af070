use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Characters that are invalid in a filename on at least one common
/// filesystem.
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const DEFAULT_EXTENSION: &str = ".jpg";
const DEFAULT_PREFIX: &str = "photo";

/// Replace reserved characters with `_`, then trim leading whitespace and any
/// trailing run of whitespace and dots (Windows strips those silently).
pub fn clean_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

/// Timestamp component of a download filename: `YYYY-MM-DD_HH-MM-SS` in UTC.
/// Uses dashes instead of colons so the name is valid on Windows.
pub fn filename_timestamp(created_at: &DateTime<Utc>) -> String {
    created_at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// File extension (with leading dot, lowercased) taken from the URL path,
/// ignoring the query string. Falls back to `.jpg`.
pub fn extension_from_url(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match Path::new(last_segment).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Build `<prefix>-<YYYY-MM-DD_HH-MM-SS>-<id><ext>`.
///
/// Pure function of its inputs, so re-running over the same item always
/// targets the same file.
pub fn record_filename(prefix: &str, created_at: &DateTime<Utc>, id: &str, ext: &str) -> String {
    let mut prefix = clean_filename(prefix);
    if prefix.is_empty() {
        prefix = DEFAULT_PREFIX.to_string();
    }
    let name = format!(
        "{}-{}-{}{}",
        prefix,
        filename_timestamp(created_at),
        clean_filename(id),
        ext
    );
    clean_filename(&name)
}

/// Local path a record's content is saved to.
pub fn local_download_path(directory: &Path, filename: &str) -> PathBuf {
    directory.join(clean_filename(filename))
}
