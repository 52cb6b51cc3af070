use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Retryable;

/// Failure to fetch one record's content. Always scoped to that record.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Transfer of {url} failed after {bytes_written} bytes: {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Disk error at {path}: {source}")]
    Disk {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DownloadError {
    pub(crate) fn disk(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Disk {
            path: path.into(),
            source,
        }
    }
}

impl Retryable for DownloadError {
    /// Rate limits, server errors and broken transfers are transient; client
    /// errors and local disk failures are not.
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } => true,
            DownloadError::Disk { .. } => false,
        }
    }
}

/// Why capture metadata could not be written into a downloaded file.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Cannot read metadata container of {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Cannot write metadata to {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Metadata writer panicked on {0}")]
    Panicked(PathBuf),
}
