use thiserror::Error;

#[derive(Error, Debug)]
pub enum FamlyError {
    #[error("Failed login: {0}")]
    FailedLogin(String),

    #[error("API error (HTTP {status}) for {path}: {message}")]
    ApiStatus {
        status: u16,
        path: String,
        message: String,
    },

    #[error("GraphQL error in {operation}: {message}")]
    GraphQl { operation: String, message: String },

    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),

    #[error("No children found via /api/me/me/me")]
    NoChildrenFound,

    #[error("No child named \"{0}\" found")]
    ChildNotFound(String),

    /// A single image or entry could not be turned into a photo record.
    #[error("Cannot normalize {kind} item {id}: {reason}")]
    Normalize {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FamlyError {
    /// Whether the error only affects one record, so the run can carry on.
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, FamlyError::Normalize { .. })
    }

    pub(crate) fn normalize(kind: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        FamlyError::Normalize {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_item_scoped() {
        let e = FamlyError::normalize("journey", "img-1", "missing secret");
        assert!(e.is_item_scoped());
        assert_eq!(
            e.to_string(),
            "Cannot normalize journey item img-1: missing secret"
        );
    }

    #[test]
    fn test_preconditions_are_fatal() {
        assert!(!FamlyError::NoChildrenFound.is_item_scoped());
        assert!(!FamlyError::ChildNotFound("Ada".into()).is_item_scoped());
        assert!(!FamlyError::UnexpectedResponse("x".into()).is_item_scoped());
    }
}
