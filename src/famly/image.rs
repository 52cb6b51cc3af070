//! Image payload shapes returned by the Famly API.
//!
//! Tagged images (`/api/v2/images/tagged`, message attachments) carry a public
//! URL split into prefix/key. Journey and note images are "secret": their URL
//! is assembled from a signed `secret` block with an expiry.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use super::error::FamlyError;

/// Fields every image shape exposes once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    Tagged(ImageInfo),
    Secret(ImageInfo),
}

impl ImageRef {
    /// Parse a public (tagged or message) image.
    ///
    /// `date_override` replaces the image's own `createdAt`; messages use it
    /// to stamp attachments with the message time.
    pub fn parse_tagged(
        value: &Value,
        date_override: Option<&str>,
        text: Option<String>,
    ) -> Result<Self, FamlyError> {
        const KIND: &str = "tagged image";
        let id = json_id(value.get("imageId").or_else(|| value.get("id")))
            .ok_or_else(|| FamlyError::normalize(KIND, "?", "no imageId"))?;

        let url = match value.get("url_big").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => {
                let prefix = str_field(value, "prefix")
                    .ok_or_else(|| FamlyError::normalize(KIND, &id, "no prefix or url_big"))?;
                let key = str_field(value, "key")
                    .ok_or_else(|| FamlyError::normalize(KIND, &id, "no key"))?;
                let (width, height) = dimensions(value)
                    .ok_or_else(|| FamlyError::normalize(KIND, &id, "no width/height"))?;
                format!("{}/{}x{}/{}", prefix.trim_end_matches('/'), width, height, key)
            }
        };

        let created_at = match date_override {
            Some(date) => parse_timestamp(date, None),
            None => tagged_created_at(value.get("createdAt")),
        }
        .ok_or_else(|| FamlyError::normalize(KIND, &id, "unparseable createdAt"))?;

        Ok(ImageRef::Tagged(ImageInfo {
            id,
            url,
            created_at,
            text,
        }))
    }

    /// Parse a secret image as attached to journey observations and notes.
    pub fn parse_secret(value: &Value, date: &str, text: Option<String>) -> Result<Self, FamlyError> {
        const KIND: &str = "secret image";
        let id = json_id(value.get("id").or_else(|| value.get("imageId")))
            .ok_or_else(|| FamlyError::normalize(KIND, "?", "no id"))?;
        let secret = value
            .get("secret")
            .filter(|s| s.is_object())
            .ok_or_else(|| FamlyError::normalize(KIND, &id, "no secret block"))?;

        let prefix = str_field(secret, "prefix")
            .ok_or_else(|| FamlyError::normalize(KIND, &id, "secret has no prefix"))?;
        let key = str_field(secret, "key")
            .ok_or_else(|| FamlyError::normalize(KIND, &id, "secret has no key"))?;
        let path = str_field(secret, "path")
            .ok_or_else(|| FamlyError::normalize(KIND, &id, "secret has no path"))?;
        let (width, height) = dimensions(value)
            .ok_or_else(|| FamlyError::normalize(KIND, &id, "no width/height"))?;

        let mut url = format!(
            "{}/{}/{}x{}/{}",
            prefix.trim_end_matches('/'),
            key,
            width,
            height,
            path.trim_start_matches('/')
        );
        if let Some(expires) = secret.get("expires").and_then(scalar_string) {
            url.push_str("?expires=");
            url.push_str(&expires);
        }

        let created_at = parse_timestamp(date, None)
            .ok_or_else(|| FamlyError::normalize(KIND, &id, format!("unparseable date '{date}'")))?;

        Ok(ImageRef::Secret(ImageInfo {
            id,
            url,
            created_at,
            text,
        }))
    }

    pub fn into_info(self) -> ImageInfo {
        match self {
            ImageRef::Tagged(info) | ImageRef::Secret(info) => info,
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Render a string or number as a string.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_id(value: Option<&Value>) -> Option<String> {
    value.and_then(scalar_string)
}

fn dimensions(value: &Value) -> Option<(u64, u64)> {
    let width = value.get("width").and_then(Value::as_u64)?;
    let height = value.get("height").and_then(Value::as_u64)?;
    Some((width, height))
}

/// `createdAt` on tagged images is either an ISO string or a PHP-style
/// `{"date": "...", "timezone": "..."}` object.
fn tagged_created_at(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_timestamp(s, None),
        Value::Object(obj) => {
            let date = obj.get("date").and_then(Value::as_str)?;
            let timezone = obj.get("timezone").and_then(Value::as_str);
            parse_timestamp(date, timezone)
        }
        _ => None,
    }
}

/// Parse the timestamp formats seen across Famly endpoints into UTC.
///
/// Offset-carrying strings (RFC 3339 and `+0000` style) are converted
/// directly. Naive `YYYY-MM-DD HH:MM:SS[.ffffff]` strings are interpreted in
/// `timezone`: UTC when absent, otherwise a numeric offset or an IANA zone
/// name. An unknown zone yields `None` rather than a guessed instant.
pub fn parse_timestamp(s: &str, timezone: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?;

    let tz = match timezone.map(str::trim) {
        None | Some("") | Some("UTC") | Some("Z") | Some("Etc/UTC") => return Some(naive.and_utc()),
        Some(tz) => tz,
    };
    if let Some(offset) = parse_offset(tz) {
        return naive
            .and_local_timezone(offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc));
    }
    match tz.parse::<Tz>() {
        // Ambiguous wall-clock times (DST fall-back) take the earlier instant.
        Ok(zone) => naive
            .and_local_timezone(zone)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
        Err(_) => {
            tracing::debug!("Unknown timezone '{}' on '{}'", tz, s);
            None
        }
    }
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let probe = format!("2000-01-01T00:00:00{tz}");
    DateTime::parse_from_rfc3339(&probe)
        .or_else(|_| DateTime::parse_from_str(&probe, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| *dt.offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_tagged_from_prefix_and_key() {
        let img = ImageRef::parse_tagged(
            &json!({
                "imageId": "img-1",
                "prefix": "https://img.famly.co/image/",
                "key": "abc/def.jpg",
                "width": 800,
                "height": 600,
                "createdAt": {"date": "2024-03-01 09:15:00.000000", "timezone_type": 3, "timezone": "UTC"}
            }),
            None,
            None,
        )
        .unwrap();
        assert!(matches!(img, ImageRef::Tagged(_)));
        let info = img.into_info();
        assert_eq!(info.id, "img-1");
        assert_eq!(info.url, "https://img.famly.co/image/800x600/abc/def.jpg");
        assert_eq!(
            info.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap()
        );
        assert!(info.text.is_none());
    }

    #[test]
    fn test_parse_tagged_prefers_url_big_and_override() {
        let info = ImageRef::parse_tagged(
            &json!({"imageId": 42, "url_big": "https://cdn/x.png"}),
            Some("2024-05-02T10:00:00+02:00"),
            Some("Hello - Teacher".into()),
        )
        .unwrap()
        .into_info();
        assert_eq!(info.id, "42");
        assert_eq!(info.url, "https://cdn/x.png");
        assert_eq!(
            info.created_at,
            Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap()
        );
        assert_eq!(info.text.as_deref(), Some("Hello - Teacher"));
    }

    #[test]
    fn test_parse_tagged_converts_named_zone_to_utc() {
        let info = ImageRef::parse_tagged(
            &json!({
                "imageId": "cph",
                "url_big": "https://cdn/cph.jpg",
                "createdAt": {"date": "2024-07-01 12:00:00.000000", "timezone_type": 3, "timezone": "Europe/Copenhagen"}
            }),
            None,
            None,
        )
        .unwrap()
        .into_info();
        assert_eq!(
            info.created_at,
            Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_tagged_unknown_zone_is_item_error() {
        let err = ImageRef::parse_tagged(
            &json!({
                "imageId": "lost",
                "url_big": "https://cdn/lost.jpg",
                "createdAt": {"date": "2024-07-01 12:00:00.000000", "timezone": "Europe/Nowhere"}
            }),
            None,
            None,
        )
        .unwrap_err();
        assert!(err.is_item_scoped());
        assert!(matches!(err, FamlyError::Normalize { ref id, .. } if id == "lost"));
    }

    #[test]
    fn test_parse_tagged_missing_id() {
        let err = ImageRef::parse_tagged(&json!({"url_big": "https://x"}), None, None).unwrap_err();
        assert!(err.is_item_scoped());
    }

    #[test]
    fn test_parse_secret_builds_signed_url() {
        let img = ImageRef::parse_secret(
            &json!({
                "id": "sec-1",
                "width": 1024,
                "height": 768,
                "secret": {
                    "prefix": "https://private.famly.co",
                    "key": "k3y",
                    "path": "/obs/photo.jpeg",
                    "expires": "1700000000"
                }
            }),
            "2023-11-14T22:13:20Z",
            Some("Painting - Anna".into()),
        )
        .unwrap();
        assert!(matches!(img, ImageRef::Secret(_)));
        let info = img.into_info();
        assert_eq!(
            info.url,
            "https://private.famly.co/k3y/1024x768/obs/photo.jpeg?expires=1700000000"
        );
        assert_eq!(info.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_secret_requires_secret_block() {
        let err = ImageRef::parse_secret(
            &json!({"id": "s", "width": 1, "height": 1}),
            "2023-11-14T22:13:20Z",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FamlyError::Normalize { ref id, .. } if id == "s"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z", None), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05.123+00:00", None).map(|d| d.timestamp()), Some(expected.timestamp()));
        assert_eq!(parse_timestamp("2024-01-02T04:04:05+0100", None), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04:05.000000", Some("UTC")), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 05:04:05", Some("+02:00")), Some(expected));
        assert_eq!(parse_timestamp("yesterday", None), None);
    }

    #[test]
    fn test_parse_timestamp_named_zones() {
        // CEST (+02:00) in summer, CET (+01:00) in winter.
        assert_eq!(
            parse_timestamp("2024-07-01 12:00:00.000000", Some("Europe/Copenhagen")),
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-01-15 12:00:00", Some("Europe/Copenhagen")),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-07-01 08:00:00", Some("America/New_York")),
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap())
        );
        // Repeated hour at the end of DST resolves to the earlier instant.
        assert_eq!(
            parse_timestamp("2024-10-27 02:30:00", Some("Europe/Copenhagen")),
            Some(Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap())
        );
        assert_eq!(parse_timestamp("2024-01-02 03:04:05", Some("Europe/Nowhere")), None);
    }
}
