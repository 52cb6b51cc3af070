//! HTTP transport for the Famly API.
//!
//! [`FamlyApi`] is the narrow capability the rest of the crate depends on;
//! [`FamlyClient`] is the production implementation that logs in with a
//! password and attaches the resulting access token to every call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::FamlyError;

pub const DEFAULT_BASE_URL: &str = "https://app.famly.co";

/// Header carrying the access token returned by the login mutation.
pub const ACCESS_TOKEN_HEADER: &str = "x-famly-accesstoken";

const AUTHENTICATE_MUTATION: &str = "mutation Authenticate($email: EmailAddress!, $password: Password!, $deviceId: DeviceId, $legacy: Boolean) {
  me {
    authenticateWithPassword(email: $email, password: $password, deviceId: $deviceId, legacy: $legacy) {
      ... on AuthenticationSucceeded { accessToken }
      ... on AuthenticationFailed { errorTitle errorDetails }
      __typename
    }
  }
}";

const LEARNING_JOURNEY_QUERY: &str = "query LearningJourneyQuery($childId: ChildId!, $first: Int!, $next: ObservationCursor) {
  childDevelopment {
    observations(first: $first, childIds: [$childId], next: $next, ignoreMissing: true) {
      results {
        id
        remark { body }
        createdBy { name { fullName } }
        status { createdAt }
        images { id height width secret { crop expires key path prefix } }
      }
      next
    }
  }
}";

const CHILD_NOTES_QUERY: &str = "query GetChildNotes($childId: ChildId!, $first: Int!, $next: ChildNoteCursor) {
  childNotes(childId: $childId, first: $first, next: $next) {
    result {
      id
      text
      createdAt
      createdBy { name { fullName } }
      images { id height width secret { crop expires key path prefix } }
    }
    next
  }
}";

/// One page of a cursor-paginated feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Cursor for the following page; `None` on the last page.
    pub next: Option<String>,
}

impl Page {
    /// Take the list under `items_key` and the `next` cursor out of a GraphQL
    /// connection object. An empty cursor string counts as "no next page".
    pub fn from_connection(connection: &mut Value, items_key: &str) -> Result<Self, FamlyError> {
        let items = match connection.get_mut(items_key).map(Value::take) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(FamlyError::UnexpectedResponse(format!(
                    "'{items_key}' is not a list: {other}"
                )))
            }
            None => {
                return Err(FamlyError::UnexpectedResponse(format!(
                    "page has no '{items_key}' field"
                )))
            }
        };
        let next = connection
            .get("next")
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(str::to_owned);
        Ok(Self { items, next })
    }
}

/// Authenticated access to the Famly API.
#[async_trait]
pub trait FamlyApi: Send + Sync {
    /// Plain REST call; returns the parsed JSON body (`Null` for an empty body).
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, FamlyError>;

    /// One page of learning-journey observations for a child.
    async fn learning_journey(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError>;

    /// One page of notes written about a child.
    async fn child_notes(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError>;
}

// Lets a caller keep a handle on the API while a session owns a clone.
#[async_trait]
impl<T: FamlyApi + ?Sized> FamlyApi for std::sync::Arc<T> {
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, FamlyError> {
        (**self).request(method, path, params).await
    }

    async fn learning_journey(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError> {
        (**self).learning_journey(child_id, cursor, first).await
    }

    async fn child_notes(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError> {
        (**self).child_notes(child_id, cursor, first).await
    }
}

pub struct FamlyClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for FamlyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamlyClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl FamlyClient {
    /// Log in with email and password and return a client bound to the
    /// issued access token.
    pub async fn login(
        base_url: &str,
        email: &str,
        password: &str,
        timeout_secs: u64,
    ) -> Result<Self, FamlyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let url = format!("{base_url}/graphql?Authenticate");
        let body = json!({
            "operationName": "Authenticate",
            "variables": {
                "email": email,
                "password": password,
                "deviceId": Uuid::new_v4().to_string(),
                "legacy": false,
            },
            "query": AUTHENTICATE_MUTATION,
        });

        tracing::debug!("POST {}", url);
        let response = http.post(&url).json(&body).send().await?;
        let mut data = graphql_data(response, "Authenticate").await?;
        let result = data
            .pointer_mut("/me/authenticateWithPassword")
            .map(Value::take)
            .unwrap_or(Value::Null);

        match result.get("accessToken").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => {
                tracing::debug!("Logged in as {}", email);
                Ok(Self::with_token(http, &base_url, token))
            }
            _ => {
                let reason = result
                    .get("errorTitle")
                    .and_then(Value::as_str)
                    .or_else(|| result.get("__typename").and_then(Value::as_str))
                    .unwrap_or("no access token returned");
                Err(FamlyError::FailedLogin(reason.to_string()))
            }
        }
    }

    /// Wrap an already issued access token.
    pub fn with_token(http: Client, base_url: &str, access_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    async fn graphql(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<Value, FamlyError> {
        let url = format!("{}/graphql?{}", self.base_url, operation);
        tracing::debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .json(&json!({
                "operationName": operation,
                "variables": variables,
                "query": query,
            }))
            .send()
            .await?;
        graphql_data(response, operation).await
    }
}

/// Unwrap the `data` member of a GraphQL response, turning HTTP failures and
/// non-empty `errors` arrays into typed errors.
async fn graphql_data(response: Response, operation: &str) -> Result<Value, FamlyError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(FamlyError::ApiStatus {
            status: status.as_u16(),
            path: format!("/graphql?{operation}"),
            message,
        });
    }

    let mut body: Value = response.json().await?;
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FamlyError::GraphQl {
                operation: operation.to_string(),
                message,
            });
        }
    }

    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(FamlyError::UnexpectedResponse(format!(
            "{operation} response carries no data"
        ))),
    }
}

#[async_trait]
impl FamlyApi for FamlyClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, FamlyError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);
        let response = self
            .http
            .request(method, &url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FamlyError::ApiStatus {
                status: status.as_u16(),
                path: path.to_string(),
                message,
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn learning_journey(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError> {
        let mut data = self
            .graphql(
                "LearningJourneyQuery",
                LEARNING_JOURNEY_QUERY,
                json!({"childId": child_id, "first": first, "next": cursor}),
            )
            .await?;
        let connection = data
            .pointer_mut("/childDevelopment/observations")
            .ok_or_else(|| {
                FamlyError::UnexpectedResponse("LearningJourneyQuery has no observations".into())
            })?;
        Page::from_connection(connection, "results")
    }

    async fn child_notes(
        &self,
        child_id: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Page, FamlyError> {
        let mut data = self
            .graphql(
                "GetChildNotes",
                CHILD_NOTES_QUERY,
                json!({"childId": child_id, "first": first, "next": cursor}),
            )
            .await?;
        let connection = data
            .get_mut("childNotes")
            .ok_or_else(|| FamlyError::UnexpectedResponse("GetChildNotes has no childNotes".into()))?;
        Page::from_connection(connection, "result")
    }
}
