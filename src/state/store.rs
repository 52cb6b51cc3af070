//! JSON-file seen-set store.
//!
//! On disk the file is an object keyed by user, each value holding the
//! user's seen keys oldest first:
//!
//! ```json
//! {"parent@example.com": {"seen_ids": ["tagged:123", "journey:456"]}}
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::error::StateError;

/// Maximum number of keys remembered per user. Oldest keys are evicted first.
pub const SEEN_CAP: usize = 50_000;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct UserState {
    #[serde(default)]
    seen_ids: VecDeque<String>,
}

type StateFile = BTreeMap<String, UserState>;

/// Per-user seen keys, loaded once at the start of a run and saved once at
/// the end.
#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    users: StateFile,
    /// Lookup mirror of each user's `seen_ids`; always holds the same keys.
    index: HashMap<String, HashSet<String>>,
}

impl SeenStore {
    /// An empty store that will save to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            users: StateFile::new(),
            index: HashMap::new(),
        }
    }

    /// Load the store from `path`. A missing file gives an empty store; an
    /// unreadable or corrupt one does too, with a warning.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path).await {
            Ok(Some(users)) => Self::from_users(path, users),
            Ok(None) => {
                tracing::debug!("No state file at {}, starting fresh", path.display());
                Self::empty(path)
            }
            Err(e) => {
                tracing::warn!("Ignoring state file: {}", e);
                Self::empty(path)
            }
        }
    }

    async fn try_load(path: &Path) -> Result<Option<StateFile>, StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Rebuild the lookup index, dropping duplicates and anything over the cap
    /// that a hand-edited file might contain.
    fn from_users(path: PathBuf, loaded: StateFile) -> Self {
        let mut store = Self::empty(path);
        for (user, state) in loaded {
            for key in state.seen_ids {
                store.mark(&user, &key);
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seen(&self, user: &str, key: &str) -> bool {
        self.index.get(user).is_some_and(|keys| keys.contains(key))
    }

    /// Record `key` for `user`. Returns `false` when it was already present.
    pub fn mark(&mut self, user: &str, key: &str) -> bool {
        let index = self.index.entry(user.to_string()).or_default();
        if !index.insert(key.to_string()) {
            return false;
        }
        let seen_ids = &mut self.users.entry(user.to_string()).or_default().seen_ids;
        seen_ids.push_back(key.to_string());
        while seen_ids.len() > SEEN_CAP {
            if let Some(evicted) = seen_ids.pop_front() {
                index.remove(&evicted);
            }
        }
        true
    }

    /// Number of keys remembered for `user`.
    pub fn count(&self, user: &str) -> usize {
        self.users.get(user).map_or(0, |s| s.seen_ids.len())
    }

    /// `(user, key count)` for every user in the store, sorted by user.
    pub fn user_counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.users
            .iter()
            .map(|(user, state)| (user.as_str(), state.seen_ids.len()))
    }

    /// Write the store to its path: serialize into a sibling `.tmp` file,
    /// flush it to disk, then rename it over the target.
    pub async fn save(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(&self.users)?;

        let tmp_path = tmp_path_for(&self.path);
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StateError::io(&self.path, e))?;
        tracing::debug!(
            "Saved state for {} user(s) to {}",
            self.users.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Delete the state file at `path`. Returns `false` when there was none.
pub async fn remove_state_file(path: &Path) -> Result<bool, StateError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StateError::io(path, e)),
    }
}
