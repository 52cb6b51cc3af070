//! Lazy record streams over the four Famly photo feeds.
//!
//! Each stream is forward-only and pulls one API page (or conversation) at a
//! time, so a consumer that stops early never triggers further requests.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Method;
use serde_json::Value;

use super::children::{select_children, Child};
use super::client::{FamlyApi, Page};
use super::error::FamlyError;
use super::image::ImageRef;
use super::record::{caption, PhotoRecord, SourceKind};
use super::Session;

/// Page size requested from the cursor-paginated feeds.
pub const PAGE_SIZE: u32 = 100;

const TAGGED_PATH: &str = "/api/v2/images/tagged";
const CONVERSATIONS_PATH: &str = "/api/v2/conversations";
const MESSAGE_PREFIX: &str = "message";

pub type RecordStream<'a> = BoxStream<'a, Result<PhotoRecord, FamlyError>>;

/// Record stream for one feed. Child-scoped feeds resolve the account's
/// children (narrowed to `child_label` when given) before returning, so
/// `NoChildrenFound` / `ChildNotFound` surface here and not mid-stream.
pub async fn photo_stream<'a>(
    session: &'a Session,
    kind: SourceKind,
    child_label: Option<&str>,
) -> Result<RecordStream<'a>, FamlyError> {
    let api = session.api();
    let stream = match kind {
        SourceKind::Messages => message_records(api),
        SourceKind::Tagged => tagged_records(api, scoped_children(session, child_label).await?),
        SourceKind::Journey => cursor_records(
            api,
            CursorFeed::Journey,
            scoped_children(session, child_label).await?,
        ),
        SourceKind::Notes => cursor_records(
            api,
            CursorFeed::Notes,
            scoped_children(session, child_label).await?,
        ),
    };
    Ok(stream)
}

/// Resolve the children once for every child-scoped kind in `kinds`, so a
/// missing or unknown child fails the run before any feed is pulled.
pub async fn check_children(
    session: &Session,
    kinds: &[SourceKind],
    child_label: Option<&str>,
) -> Result<(), FamlyError> {
    if kinds.iter().any(|k| k.is_child_scoped()) {
        scoped_children(session, child_label).await?;
    }
    Ok(())
}

async fn scoped_children(session: &Session, child_label: Option<&str>) -> Result<Vec<Child>, FamlyError> {
    select_children(session.children().await?, child_label)
}

// ── Tagged ──────────────────────────────────────────────────────────────

fn tagged_records<'a>(api: &'a dyn FamlyApi, children: Vec<Child>) -> RecordStream<'a> {
    stream::iter(children)
        .then(move |child| async move {
            let listing = api
                .request(Method::GET, TAGGED_PATH, &[("childId", child.id.as_str())])
                .await;
            (child, listing)
        })
        .flat_map(|(child, listing)| {
            stream::iter(match listing {
                Ok(value) => normalize_tagged(&value, &child),
                Err(e) => vec![Err(e)],
            })
        })
        .boxed()
}

fn normalize_tagged(listing: &Value, child: &Child) -> Vec<Result<PhotoRecord, FamlyError>> {
    let label = child.label_or_default();
    match listing {
        Value::Array(images) => images
            .iter()
            .map(|img| {
                ImageRef::parse_tagged(img, None, None)
                    .map(|image| PhotoRecord::from_image(image, label, Some(label)))
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![Err(FamlyError::UnexpectedResponse(format!(
            "tagged images for {} is not a list: {}",
            child.id, other
        )))],
    }
}

// ── Journey / Notes ─────────────────────────────────────────────────────

/// The two cursor-paginated feeds: same loop, different query and fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorFeed {
    Journey,
    Notes,
}

impl CursorFeed {
    fn kind(self) -> SourceKind {
        match self {
            CursorFeed::Journey => SourceKind::Journey,
            CursorFeed::Notes => SourceKind::Notes,
        }
    }

    fn prefix(self, label: &str) -> String {
        match self {
            CursorFeed::Journey => format!("{label}-journey"),
            CursorFeed::Notes => format!("{label}-note"),
        }
    }

    async fn fetch(
        self,
        api: &dyn FamlyApi,
        child_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page, FamlyError> {
        match self {
            CursorFeed::Journey => api.learning_journey(child_id, cursor, PAGE_SIZE).await,
            CursorFeed::Notes => api.child_notes(child_id, cursor, PAGE_SIZE).await,
        }
    }

    /// Caption and timestamp of one observation or note.
    fn caption_and_date(self, item: &Value) -> (Option<String>, Option<&str>) {
        let author = item.pointer("/createdBy/name/fullName").and_then(Value::as_str);
        match self {
            CursorFeed::Journey => (
                caption(item.pointer("/remark/body").and_then(Value::as_str), author),
                item.pointer("/status/createdAt").and_then(Value::as_str),
            ),
            CursorFeed::Notes => (
                caption(item.get("text").and_then(Value::as_str), author),
                item.get("createdAt").and_then(Value::as_str),
            ),
        }
    }

    /// One record per image attached to `item`.
    fn normalize(self, item: &Value, child: &Child) -> Vec<Result<PhotoRecord, FamlyError>> {
        let images = match item.get("images").and_then(Value::as_array) {
            Some(images) if !images.is_empty() => images,
            _ => return Vec::new(),
        };
        let (text, date) = self.caption_and_date(item);
        // No capture time means no filename and no --since check: an item
        // error, not an unfiltered download.
        let Some(date) = date else {
            let id = item.get("id").and_then(Value::as_str).unwrap_or("?");
            return vec![Err(FamlyError::normalize(
                self.kind().as_str(),
                id,
                "entry has no creation time",
            ))];
        };

        let label = child.label_or_default();
        let prefix = self.prefix(label);
        images
            .iter()
            .map(|img| {
                ImageRef::parse_secret(img, date, text.clone())
                    .map(|image| PhotoRecord::from_image(image, &prefix, Some(label)))
            })
            .collect()
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Pages of one child's feed, requested strictly one after another until a
/// page comes back without a `next` cursor.
fn child_pages<'a>(
    api: &'a dyn FamlyApi,
    feed: CursorFeed,
    child_id: String,
) -> impl Stream<Item = Result<Page, FamlyError>> + Send + 'a {
    stream::unfold(Cursor::Start, move |cursor| {
        let child_id = child_id.clone();
        async move {
            let after = match cursor {
                Cursor::Done => return None,
                Cursor::Start => None,
                Cursor::Next(c) => Some(c),
            };
            let result = feed.fetch(api, &child_id, after.as_deref()).await;
            let next = match &result {
                Ok(Page { next: Some(c), .. }) if after.as_deref() == Some(c.as_str()) => {
                    tracing::warn!(
                        "{} feed for {} returned the same cursor twice, stopping",
                        feed.kind(),
                        child_id
                    );
                    Cursor::Done
                }
                Ok(Page { next: Some(c), .. }) => Cursor::Next(c.clone()),
                _ => Cursor::Done,
            };
            Some((result, next))
        }
    })
}

fn cursor_records<'a>(api: &'a dyn FamlyApi, feed: CursorFeed, children: Vec<Child>) -> RecordStream<'a> {
    stream::iter(children)
        .flat_map(move |child| {
            child_pages(api, feed, child.id.clone()).flat_map(move |page| {
                stream::iter(match page {
                    Ok(page) => page
                        .items
                        .iter()
                        .flat_map(|item| feed.normalize(item, &child))
                        .collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
            })
        })
        .boxed()
}

// ── Messages ────────────────────────────────────────────────────────────

/// Conversations newest-first, and within each, messages newest-first.
fn message_records<'a>(api: &'a dyn FamlyApi) -> RecordStream<'a> {
    stream::once(async move { api.request(Method::GET, CONVERSATIONS_PATH, &[]).await })
        .flat_map(move |listing| match listing.and_then(|v| conversation_ids(&v)) {
            Ok(ids) => stream::iter(ids.into_iter().rev())
                .then(move |id| async move {
                    let path = format!("{CONVERSATIONS_PATH}/{id}");
                    api.request(Method::GET, &path, &[]).await
                })
                .flat_map(|conversation| {
                    stream::iter(match conversation {
                        Ok(conversation) => normalize_conversation(&conversation),
                        Err(e) => vec![Err(e)],
                    })
                })
                .left_stream(),
            Err(e) => stream::iter(vec![Err(e)]).right_stream(),
        })
        .boxed()
}

fn conversation_ids(listing: &Value) -> Result<Vec<String>, FamlyError> {
    match listing {
        Value::Null => Ok(Vec::new()),
        Value::Array(conversations) => Ok(conversations
            .iter()
            .filter_map(|c| c.get("conversationId").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()),
        other => Err(FamlyError::UnexpectedResponse(format!(
            "conversation list is not a list: {other}"
        ))),
    }
}

fn normalize_conversation(conversation: &Value) -> Vec<Result<PhotoRecord, FamlyError>> {
    let Some(messages) = conversation.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };
    messages
        .iter()
        .rev()
        .flat_map(normalize_message)
        .collect()
}

fn normalize_message(message: &Value) -> Vec<Result<PhotoRecord, FamlyError>> {
    let images = match message.get("images").and_then(Value::as_array) {
        Some(images) if !images.is_empty() => images,
        _ => return Vec::new(),
    };
    let Some(date) = message.get("createdAt").and_then(Value::as_str) else {
        let id = message.get("messageId").and_then(Value::as_str).unwrap_or("?");
        return vec![Err(FamlyError::normalize(
            SourceKind::Messages.as_str(),
            id,
            "message has no createdAt",
        ))];
    };
    let text = caption(
        message.get("body").and_then(Value::as_str),
        message.pointer("/author/title").and_then(Value::as_str),
    );
    images
        .iter()
        .map(|img| {
            ImageRef::parse_tagged(img, Some(date), text.clone())
                .map(|image| PhotoRecord::from_image(image, MESSAGE_PREFIX, None))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::famly::testing::MockApi;
    use serde_json::json;

    fn me() -> Value {
        json!({"roles2": [
            {"targetId": "c1", "title": "Ada"},
            {"targetId": "c2", "title": "Bo"}
        ]})
    }

    fn secret_img(id: &str) -> Value {
        json!({
            "id": id,
            "width": 10,
            "height": 10,
            "secret": {"prefix": "https://p", "key": "k", "path": format!("{id}.jpg"), "expires": "1"}
        })
    }

    fn observation(img_ids: &[&str]) -> Value {
        json!({
            "id": "obs",
            "remark": {"body": "Building blocks"},
            "createdBy": {"name": {"fullName": "Maria K"}},
            "status": {"createdAt": "2024-04-01T10:00:00Z"},
            "images": img_ids.iter().map(|id| secret_img(id)).collect::<Vec<_>>()
        })
    }

    fn page(items: Vec<Value>, next: Option<&str>) -> Page {
        Page {
            items,
            next: next.map(str::to_owned),
        }
    }

    fn message(id: &str, minute: u32) -> Value {
        json!({
            "messageId": id,
            "body": format!("msg {id}"),
            "author": {"title": "Teacher"},
            "createdAt": format!("2024-05-01T10:{minute:02}:00+00:00"),
            "images": [{"imageId": id, "url_big": format!("https://cdn/{id}.jpg")}]
        })
    }

    async fn collect_ids(stream: RecordStream<'_>) -> Vec<String> {
        stream
            .map(|r| r.map(|rec| rec.id).unwrap_or_else(|e| format!("ERR:{e}")))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_journey_pagination_stops_on_null_next() {
        let api = Arc::new(
            MockApi::new()
                .with_response("/api/me/me/me", json!({"roles2": [{"targetId": "c1", "title": "Ada"}]}))
                .with_journey_page("c1", None, page(vec![observation(&["a1", "a2"])], Some("p2")))
                .with_journey_page("c1", Some("p2"), page(vec![observation(&["b1"])], Some("p3")))
                .with_journey_page("c1", Some("p3"), page(vec![observation(&["c1"])], None))
                .with_journey_page("c1", Some("p4"), page(vec![observation(&["never"])], None)),
        );
        let session = Session::new(Box::new(api.clone()));

        let stream = photo_stream(&session, SourceKind::Journey, None).await.unwrap();
        assert_eq!(collect_ids(stream).await, ["a1", "a2", "b1", "c1"]);
        assert_eq!(
            api.calls(),
            ["/api/me/me/me", "journey:c1:-", "journey:c1:p2", "journey:c1:p3"]
        );
    }

    #[tokio::test]
    async fn test_journey_record_fields() {
        let api = MockApi::new()
            .with_response("/api/me/me/me", json!({"roles2": [{"targetId": "c1", "title": "Ada"}]}))
            .with_journey_page("c1", None, page(vec![observation(&["x"])], None));
        let session = Session::new(Box::new(api));

        let records: Vec<_> = photo_stream(&session, SourceKind::Journey, None)
            .await
            .unwrap()
            .collect()
            .await;
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.filename, "Ada-journey-2024-04-01_10-00-00-x.jpg");
        assert_eq!(record.text.as_deref(), Some("Building blocks - Maria K"));
        assert_eq!(record.child_label.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_notes_walk_every_child() {
        let note = json!({
            "id": "n1",
            "text": "Nap went well",
            "createdAt": "2024-04-02T12:00:00Z",
            "createdBy": {"name": {"fullName": "Sam"}},
            "images": [secret_img("n-img")]
        });
        let api = Arc::new(
            MockApi::new()
                .with_response("/api/me/me/me", me())
                .with_notes_page("c1", None, page(vec![note.clone()], None))
                .with_notes_page("c2", None, page(vec![note], None)),
        );
        let session = Session::new(Box::new(api.clone()));

        let records: Vec<PhotoRecord> = photo_stream(&session, SourceKind::Notes, None)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records.len(), 2);
        assert!(records[0].filename.starts_with("Ada-note-"));
        assert!(records[1].filename.starts_with("Bo-note-"));
        assert_eq!(records[1].text.as_deref(), Some("Nap went well - Sam"));
        assert_eq!(
            api.calls(),
            ["/api/me/me/me", "notes:c1:-", "notes:c2:-"]
        );
    }

    #[tokio::test]
    async fn test_tagged_uses_child_label_prefix() {
        let api = MockApi::new()
            .with_response("/api/me/me/me", me())
            .with_response(
                "/api/v2/images/tagged?childId=c2",
                json!([{
                    "imageId": "t1",
                    "prefix": "https://img",
                    "key": "abc.jpg",
                    "width": 100,
                    "height": 50,
                    "createdAt": {"date": "2024-01-05 07:00:00.000000", "timezone": "UTC"}
                }]),
            );
        let session = Session::new(Box::new(api));

        let records: Vec<PhotoRecord> = photo_stream(&session, SourceKind::Tagged, Some("Bo"))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "Bo-2024-01-05_07-00-00-t1.jpg");
        assert_eq!(records[0].url, "https://img/100x50/abc.jpg");
    }

    #[tokio::test]
    async fn test_messages_are_newest_first() {
        let api = Arc::new(
            MockApi::new()
                .with_response(
                    "/api/v2/conversations",
                    json!([{"conversationId": "A"}, {"conversationId": "B"}]),
                )
                .with_response(
                    "/api/v2/conversations/A",
                    json!({"messages": [message("A.m1", 1), message("A.m2", 2)]}),
                )
                .with_response(
                    "/api/v2/conversations/B",
                    json!({"messages": [message("B.m1", 3), message("B.m2", 4)]}),
                ),
        );
        let session = Session::new(Box::new(api.clone()));

        let stream = photo_stream(&session, SourceKind::Messages, None).await.unwrap();
        assert_eq!(collect_ids(stream).await, ["B.m2", "B.m1", "A.m2", "A.m1"]);
        // Messages never need child discovery.
        assert!(!api.calls().iter().any(|c| c == "/api/me/me/me"));
    }

    #[tokio::test]
    async fn test_message_record_fields() {
        let api = MockApi::new()
            .with_response("/api/v2/conversations", json!([{"conversationId": "A"}]))
            .with_response("/api/v2/conversations/A", json!({"messages": [message("m", 7)]}));
        let session = Session::new(Box::new(api));

        let mut stream = photo_stream(&session, SourceKind::Messages, None).await.unwrap();
        let record = stream.next().await.unwrap().unwrap();
        assert_eq!(record.filename, "message-2024-05-01_10-07-00-m.jpg");
        assert_eq!(record.text.as_deref(), Some("msg m - Teacher"));
        assert!(record.child_label.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_child_fails_before_streaming() {
        let api = MockApi::new().with_response("/api/me/me/me", me());
        let session = Session::new(Box::new(api));
        let result = photo_stream(&session, SourceKind::Journey, Some("Zed")).await;
        assert!(matches!(result, Err(FamlyError::ChildNotFound(_))));
    }

    #[tokio::test]
    async fn test_no_children_fails_child_scoped_feeds() {
        let api = MockApi::new().with_response("/api/me/me/me", json!({}));
        let session = Session::new(Box::new(api));
        let result = photo_stream(&session, SourceKind::Tagged, None).await;
        assert!(matches!(result, Err(FamlyError::NoChildrenFound)));
    }

    #[tokio::test]
    async fn test_check_children_only_for_child_scoped_kinds() {
        let api = Arc::new(MockApi::new().with_response("/api/me/me/me", json!({})));
        let session = Session::new(Box::new(api.clone()));

        check_children(&session, &[SourceKind::Messages], None).await.unwrap();
        assert!(api.calls().is_empty());

        let err = check_children(&session, &[SourceKind::Messages, SourceKind::Tagged], None)
            .await
            .unwrap_err();
        assert!(matches!(err, FamlyError::NoChildrenFound));
    }

    #[tokio::test]
    async fn test_check_children_rejects_unknown_label() {
        let api = MockApi::new().with_response("/api/me/me/me", me());
        let session = Session::new(Box::new(api));
        check_children(&session, &[SourceKind::Notes], Some("Bo")).await.unwrap();
        let err = check_children(&session, &[SourceKind::Notes], Some("Zed"))
            .await
            .unwrap_err();
        assert!(matches!(err, FamlyError::ChildNotFound(ref l) if l == "Zed"));
    }

    #[tokio::test]
    async fn test_malformed_image_is_item_scoped() {
        let mut obs = observation(&["good"]);
        obs["images"]
            .as_array_mut()
            .unwrap()
            .insert(0, json!({"id": "broken", "width": 1, "height": 1}));
        let api = MockApi::new()
            .with_response("/api/me/me/me", json!({"roles2": [{"targetId": "c1", "title": "Ada"}]}))
            .with_journey_page("c1", None, page(vec![obs], None));
        let session = Session::new(Box::new(api));

        let results: Vec<_> = photo_stream(&session, SourceKind::Journey, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap_err().is_item_scoped());
        assert_eq!(results[1].as_ref().unwrap().id, "good");
    }

    #[tokio::test]
    async fn test_page_error_is_yielded_and_ends_child() {
        let api = MockApi::new()
            .with_response("/api/me/me/me", json!({"roles2": [{"targetId": "c1", "title": "Ada"}]}))
            .with_journey_page("c1", None, page(vec![observation(&["p1"])], Some("missing")));
        let session = Session::new(Box::new(api));

        let results: Vec<_> = photo_stream(&session, SourceKind::Journey, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FamlyError::ApiStatus { status: 404, .. })));
    }
}
