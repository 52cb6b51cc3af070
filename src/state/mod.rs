//! Persistent seen-set tracking.
//!
//! Remembers which `(source kind, item id)` pairs each user has already
//! downloaded so incremental runs can skip them. Stored as a single JSON file
//! that is rewritten atomically at the end of every run.

pub mod error;
pub mod store;

pub use error::StateError;
pub use store::{SeenStore, SEEN_CAP};
