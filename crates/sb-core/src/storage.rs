//! Persistent state store
//!
//! The browser exposes two key-value areas: `sync` (follows the user across
//! devices) and `local`. [`StateStore`] is the raw JSON boundary; [`Storage`]
//! wraps it with one typed accessor per persisted key and rejects payloads
//! that do not match their schema.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::config::{BLOCKED_SITES_KEY, IS_ENABLED_KEY, TEMP_WHITELIST_KEY};
use crate::error::StorageError;
use crate::whitelist::TempWhitelist;

/// Storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Blocked sites and the enabled flag
    Sync,
    /// Whitelist and statistics
    Local,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Sync => "sync",
            Scope::Local => "local",
        }
    }

    /// Parse the `areaName` the browser passes to `storage.onChanged`.
    pub fn from_area(area: &str) -> Option<Self> {
        match area {
            "sync" => Some(Scope::Sync),
            "local" => Some(Scope::Local),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw key-value access to one browser storage implementation.
///
/// Missing keys are simply absent from the returned map.
#[async_trait(?Send)]
pub trait StateStore {
    async fn get(&self, scope: Scope, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    async fn set(&self, scope: Scope, items: Map<String, Value>) -> Result<(), StorageError>;
}

/// Contents of the synced scope as the reconciler sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncState {
    pub blocked_sites: Vec<String>,
    pub is_enabled: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            blocked_sites: Vec::new(),
            is_enabled: true,
        }
    }
}

/// Typed view over a [`StateStore`].
pub struct Storage<S> {
    store: S,
}

impl<S: StateStore> Storage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) async fn read<T: DeserializeOwned>(&self, scope: Scope, key: &str) -> Result<Option<T>, StorageError> {
        let mut items = self.store.get(scope, &[key]).await?;
        decode(scope, key, &mut items)
    }

    pub(crate) async fn write<T: Serialize>(&self, scope: Scope, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|source| StorageError::Schema {
            scope,
            key: key.to_string(),
            source,
        })?;
        let mut items = Map::new();
        items.insert(key.to_string(), value);
        self.store.set(scope, items).await
    }

    /// Blocked sites and enabled flag in a single read. Absent keys fall back
    /// to an empty list and `true`.
    pub async fn sync_state(&self) -> Result<SyncState, StorageError> {
        let mut items = self
            .store
            .get(Scope::Sync, &[BLOCKED_SITES_KEY, IS_ENABLED_KEY])
            .await?;
        let defaults = SyncState::default();
        Ok(SyncState {
            blocked_sites: decode(Scope::Sync, BLOCKED_SITES_KEY, &mut items)?
                .unwrap_or(defaults.blocked_sites),
            is_enabled: decode(Scope::Sync, IS_ENABLED_KEY, &mut items)?.unwrap_or(defaults.is_enabled),
        })
    }

    pub async fn blocked_sites(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read(Scope::Sync, BLOCKED_SITES_KEY).await?.unwrap_or_default())
    }

    pub async fn set_blocked_sites(&self, sites: &[String]) -> Result<(), StorageError> {
        self.write(Scope::Sync, BLOCKED_SITES_KEY, &sites).await
    }

    pub async fn is_enabled(&self) -> Result<bool, StorageError> {
        Ok(self.read(Scope::Sync, IS_ENABLED_KEY).await?.unwrap_or(true))
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), StorageError> {
        self.write(Scope::Sync, IS_ENABLED_KEY, &enabled).await
    }

    pub async fn temp_whitelist(&self) -> Result<TempWhitelist, StorageError> {
        Ok(self.read(Scope::Local, TEMP_WHITELIST_KEY).await?.unwrap_or_default())
    }

    pub async fn save_temp_whitelist(&self, whitelist: &TempWhitelist) -> Result<(), StorageError> {
        self.write(Scope::Local, TEMP_WHITELIST_KEY, whitelist).await
    }

    /// Seed the block list on first install. Returns whether anything was
    /// written; an existing list (even an empty one) is left alone.
    pub async fn initialize(&self, default_sites: &[String]) -> Result<bool, StorageError> {
        let existing: Option<Vec<String>> = self.read(Scope::Sync, BLOCKED_SITES_KEY).await?;
        if existing.is_some() {
            return Ok(false);
        }

        let mut items = Map::new();
        items.insert(BLOCKED_SITES_KEY.to_string(), Value::from(default_sites.to_vec()));
        items.insert(IS_ENABLED_KEY.to_string(), Value::Bool(true));
        self.store.set(Scope::Sync, items).await?;
        Ok(true)
    }
}

/// Take `key` out of `items` and validate it. `null` counts as absent.
fn decode<T: DeserializeOwned>(
    scope: Scope,
    key: &str,
    items: &mut Map<String, Value>,
) -> Result<Option<T>, StorageError> {
    match items.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::Schema {
                scope,
                key: key.to_string(),
                source,
            }),
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// [`StateStore`] held in process memory. Records every write so callers can
/// check which keys a pass touched, and can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sync: Mutex<Map<String, Value>>,
    local: Mutex<Map<String, Value>>,
    writes: Mutex<Vec<(Scope, Vec<String>)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, scope: Scope, key: &str, value: Value) -> Self {
        self.insert(scope, key, value);
        self
    }

    /// Write without recording it, as if another context changed the value.
    pub fn insert(&self, scope: Scope, key: &str, value: Value) {
        lock(self.area(scope)).insert(key.to_string(), value);
    }

    pub fn value(&self, scope: Scope, key: &str) -> Option<Value> {
        lock(self.area(scope)).get(key).cloned()
    }

    /// Every recorded `set` call, oldest first.
    pub fn writes(&self) -> Vec<(Scope, Vec<String>)> {
        lock(&self.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn area(&self, scope: Scope) -> &Mutex<Map<String, Value>> {
        match scope {
            Scope::Sync => &self.sync,
            Scope::Local => &self.local,
        }
    }
}

#[async_trait(?Send)]
impl StateStore for MemoryStore {
    async fn get(&self, scope: Scope, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                scope,
                message: "read failed".to_string(),
            });
        }

        let area = lock(self.area(scope));
        Ok(keys
            .iter()
            .filter_map(|key| area.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, scope: Scope, items: Map<String, Value>) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                scope,
                message: "write failed".to_string(),
            });
        }

        lock(&self.writes).push((scope, items.keys().cloned().collect()));
        lock(self.area(scope)).extend(items);
        Ok(())
    }
}
