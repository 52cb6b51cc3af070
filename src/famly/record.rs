//! The canonical photo record every source feed is normalized into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::image::ImageRef;
use crate::download::paths;

/// Which API feed a record came from. Item ids are only unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tagged,
    Journey,
    Notes,
    Messages,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Tagged,
        SourceKind::Journey,
        SourceKind::Notes,
        SourceKind::Messages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Tagged => "tagged",
            SourceKind::Journey => "journey",
            SourceKind::Notes => "notes",
            SourceKind::Messages => "messages",
        }
    }

    /// Case-insensitive lookup; `None` for names that aren't a known feed.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }

    /// Whether the feed is scoped per child (and so needs child discovery).
    pub fn is_child_scoped(&self) -> bool {
        !matches!(self, SourceKind::Messages)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl PhotoRecord {
    /// Normalize a parsed image. `prefix` is the leading filename component
    /// (child label, `"<label>-journey"`, `"message"`, ...).
    pub fn from_image(image: ImageRef, prefix: &str, child_label: Option<&str>) -> Self {
        let info = image.into_info();
        let ext = paths::extension_from_url(&info.url);
        let filename = paths::record_filename(prefix, &info.created_at, &info.id, &ext);
        Self {
            id: info.id,
            created_at: info.created_at,
            url: info.url,
            filename,
            child_label: child_label.map(str::to_owned),
            text: info.text,
        }
    }

    /// Seen-set key, namespaced by feed: `"<kind>:<id>"`.
    pub fn seen_key(&self, kind: SourceKind) -> String {
        format!("{}:{}", kind.as_str(), self.id)
    }
}

/// Caption in the `"<body> - <author>"` form used for every feed.
pub(crate) fn caption(body: Option<&str>, author: Option<&str>) -> Option<String> {
    match (body.map(str::trim), author.map(str::trim)) {
        (Some(b), Some(a)) if !b.is_empty() && !a.is_empty() => Some(format!("{b} - {a}")),
        (Some(b), _) if !b.is_empty() => Some(b.to_string()),
        (_, Some(a)) if !a.is_empty() => Some(format!(" - {a}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn secret_image() -> ImageRef {
        ImageRef::parse_secret(
            &json!({
                "id": "obs-img-9",
                "width": 640,
                "height": 480,
                "secret": {"prefix": "https://p.famly.co", "key": "k", "path": "x.PNG", "expires": 5}
            }),
            "2024-06-01T08:30:00+02:00",
            Some("Sandpit - Maria".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!(SourceKind::parse("journey"), Some(SourceKind::Journey));
        assert_eq!(SourceKind::parse(" Messages "), Some(SourceKind::Messages));
        assert_eq!(SourceKind::parse("videos"), None);
        assert!(!SourceKind::Messages.is_child_scoped());
        assert!(SourceKind::Notes.is_child_scoped());
    }

    #[test]
    fn test_from_image_builds_canonical_record() {
        let record = PhotoRecord::from_image(secret_image(), "Ada-journey", Some("Ada"));
        assert_eq!(record.id, "obs-img-9");
        assert_eq!(
            record.created_at,
            Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap()
        );
        assert_eq!(record.filename, "Ada-journey-2024-06-01_06-30-00-obs-img-9.png");
        assert_eq!(record.child_label.as_deref(), Some("Ada"));
        assert_eq!(record.text.as_deref(), Some("Sandpit - Maria"));
    }

    #[test]
    fn test_record_serializes_to_canonical_shape() {
        let record = PhotoRecord::from_image(secret_image(), "message", None);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["createdAt"], "2024-06-01T06:30:00Z");
        assert!(value.get("childLabel").is_none());
        assert_eq!(value["text"], "Sandpit - Maria");
    }

    #[test]
    fn test_seen_key_is_namespaced() {
        let record = PhotoRecord::from_image(secret_image(), "x", None);
        assert_eq!(record.seen_key(SourceKind::Journey), "journey:obs-img-9");
        assert_ne!(
            record.seen_key(SourceKind::Journey),
            record.seen_key(SourceKind::Notes)
        );
    }

    #[test]
    fn test_caption() {
        assert_eq!(caption(Some("Lunch"), Some("Kim")).as_deref(), Some("Lunch - Kim"));
        assert_eq!(caption(Some("Lunch"), None).as_deref(), Some("Lunch"));
        assert_eq!(caption(Some(" "), Some("Kim")).as_deref(), Some(" - Kim"));
        assert_eq!(caption(None, None), None);
    }
}
