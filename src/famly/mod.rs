//! Famly API access: the login transport, child discovery and the four photo
//! feeds (tagged images, learning journey, notes, messages) normalized into
//! [`PhotoRecord`]s.

pub mod children;
pub mod client;
pub mod error;
pub mod image;
pub mod record;
pub mod sources;

pub use client::{FamlyApi, FamlyClient};
pub use error::FamlyError;
pub use record::{PhotoRecord, SourceKind};

use tokio::sync::OnceCell;

use children::Child;

/// Everything a run needs from the logged-in account. Passed by reference
/// into every operation instead of living in global state.
pub struct Session {
    api: Box<dyn FamlyApi>,
    children: OnceCell<Vec<Child>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("children", &self.children.get())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(api: Box<dyn FamlyApi>) -> Self {
        Self {
            api,
            children: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &dyn FamlyApi {
        self.api.as_ref()
    }

    /// Children of the account, discovered on first use and cached for the
    /// rest of the session.
    pub async fn children(&self) -> Result<&[Child], FamlyError> {
        self.children
            .get_or_try_init(|| children::discover_children(self.api()))
            .await
            .map(Vec::as_slice)
    }
}
