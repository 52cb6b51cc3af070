//! Best-effort capture metadata for downloaded images.
//!
//! Famly serves images without the capture time, so we write it back as EXIF
//! `DateTimeOriginal`, plus the caption as `UserComment`, for the container
//! formats little_exif can rewrite in place.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;

use super::error::MetadataError;

/// EXIF character-code prefix for a UCS-2/UTF-16 `UserComment`.
const UNICODE_PREFIX: &[u8; 8] = b"UNICODE\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Jpeg,
    Tiff,
    Png,
    WebP,
}

/// Identify the container from its leading magic bytes.
pub fn sniff_container(header: &[u8]) -> Option<Container> {
    match header {
        [0xFF, 0xD8, 0xFF, ..] => Some(Container::Jpeg),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Container::Tiff),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Container::Png),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Container::WebP),
        _ => None,
    }
}

/// Read the first bytes of `path` and identify its container.
pub fn probe_container(path: &Path) -> std::io::Result<Option<Container>> {
    let mut header = Vec::with_capacity(12);
    std::fs::File::open(path)?
        .take(12)
        .read_to_end(&mut header)?;
    Ok(sniff_container(&header))
}

/// `UNICODE\0` followed by the text as UTF-16BE.
pub fn encode_user_comment(text: &str) -> Vec<u8> {
    let mut encoded = UNICODE_PREFIX.to_vec();
    encoded.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    encoded
}

/// EXIF date format, always in UTC.
pub fn exif_datetime(created_at: &DateTime<Utc>) -> String {
    created_at.format("%Y:%m:%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum EmbedOutcome {
    Embedded(Container),
    /// Not a container we can write EXIF into; the file is left untouched.
    Unsupported,
    Failed(MetadataError),
}

/// Write `DateTimeOriginal` and (when given) `UserComment` into the image at
/// `path`. Never fails: problems come back as [`EmbedOutcome::Failed`] and the
/// file is kept either way.
pub fn embed_capture_metadata(
    path: &Path,
    created_at: &DateTime<Utc>,
    caption: Option<&str>,
) -> EmbedOutcome {
    let container = match probe_container(path) {
        Ok(Some(container)) => container,
        Ok(None) => {
            tracing::debug!("No EXIF support for {}", path.display());
            return EmbedOutcome::Unsupported;
        }
        Err(e) => {
            return EmbedOutcome::Failed(MetadataError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let datetime = exif_datetime(created_at);
    let comment = caption.filter(|c| !c.is_empty()).map(encode_user_comment);
    let written = panic::catch_unwind(AssertUnwindSafe(|| {
        write_tags(path, datetime.clone(), comment)
    }));

    match written {
        Ok(Ok(())) => {
            tracing::debug!("Set EXIF DateTimeOriginal={} on {}", datetime, path.display());
            EmbedOutcome::Embedded(container)
        }
        Ok(Err(e)) => EmbedOutcome::Failed(e),
        Err(_) => EmbedOutcome::Failed(MetadataError::Panicked(path.to_path_buf())),
    }
}

fn write_tags(path: &Path, datetime: String, comment: Option<Vec<u8>>) -> Result<(), MetadataError> {
    let owned = || PathBuf::from(path);
    let mut metadata = Metadata::new_from_path(path).map_err(|e| MetadataError::Read {
        path: owned(),
        reason: e.to_string(),
    })?;
    metadata.set_tag(ExifTag::DateTimeOriginal(datetime));
    if let Some(comment) = comment {
        metadata.set_tag(ExifTag::UserComment(comment));
    }
    metadata
        .write_to_file(path)
        .map_err(|e| MetadataError::Write {
            path: owned(),
            reason: e.to_string(),
        })
}
