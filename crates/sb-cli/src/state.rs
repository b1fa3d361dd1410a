//! Extension storage mirrored in a JSON file.
//!
//! The file has one object per storage area, the same shape
//! `chrome.storage.<area>.get(null)` returns:
//!
//! ```json
//! { "sync": { "blockedSites": ["x.com"], "isEnabled": true },
//!   "local": { "tempWhitelist": { "x.com": 1700000000000 } } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use sb_core::{Scope, StateStore, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    sync: Map<String, Value>,
    #[serde(default)]
    local: Map<String, Value>,
}

impl StateFile {
    fn area(&self, scope: Scope) -> &Map<String, Value> {
        match scope {
            Scope::Sync => &self.sync,
            Scope::Local => &self.local,
        }
    }

    fn area_mut(&mut self, scope: Scope) -> &mut Map<String, Value> {
        match scope {
            Scope::Sync => &mut self.sync,
            Scope::Local => &mut self.local,
        }
    }
}

/// [`StateStore`] persisted to a JSON file; every `set` rewrites the file.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl FileStore {
    /// Load `path`, or start empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| format!("Invalid state file '{}': {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(format!("Failed to read '{}': {}", path.display(), e)),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &StateFile, scope: Scope) -> Result<(), StorageError> {
        let backend = |message: String| StorageError::Backend { scope, message };
        let text = serde_json::to_string_pretty(state).map_err(|e| backend(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| backend(format!("{}: {}", self.path.display(), e)))?;
        debug!("Wrote {} storage to '{}'", scope, self.path.display());
        Ok(())
    }
}

#[async_trait(?Send)]
impl StateStore for FileStore {
    async fn get(&self, scope: Scope, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let area = state.area(scope);
        Ok(keys
            .iter()
            .filter_map(|key| area.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, scope: Scope, items: Map<String, Value>) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.area_mut(scope).extend(items);
        self.persist(&state, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::config::{default_blocked_sites, BLOCKED_SITES_KEY};
    use sb_core::Storage;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.json")).unwrap();

        let items = store.get(Scope::Sync, &[BLOCKED_SITES_KEY]).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_set_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let storage = Storage::new(FileStore::open(&path).unwrap());
        assert!(storage.initialize(&default_blocked_sites()).await.unwrap());
        storage.grant_bypass("reddit.com", 1_000).await.unwrap();

        let reopened = Storage::new(FileStore::open(&path).unwrap());
        assert_eq!(reopened.blocked_sites().await.unwrap(), default_blocked_sites());
        assert_eq!(reopened.temp_whitelist().await.unwrap().get("reddit.com"), Some(1_000 + 30 * 60 * 1000));
    }

    #[tokio::test]
    async fn test_areas_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"sync":{"blockedSites":["x.com"]}}"#).unwrap();

        let store = FileStore::open(&path).unwrap();
        let local = store.get(Scope::Local, &[BLOCKED_SITES_KEY]).await.unwrap();
        let sync = store.get(Scope::Sync, &[BLOCKED_SITES_KEY]).await.unwrap();

        assert!(local.is_empty());
        assert_eq!(sync.get(BLOCKED_SITES_KEY), Some(&json!(["x.com"])));
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        assert!(FileStore::open(&path).is_err());
    }
}
