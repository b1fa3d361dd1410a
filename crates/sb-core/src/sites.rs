//! Block list editing and temporary bypasses
//!
//! These run in the popup and block page. They only write storage; the
//! background picks the change up through `storage.onChanged` (or an explicit
//! `updateRules` message) and reconciles.

use serde_json::{Map, Value};

use crate::config::{BLOCKED_SITES_KEY, BYPASS_DURATION_MS, IS_ENABLED_KEY};
use crate::error::StorageError;
use crate::storage::{Scope, StateStore, Storage};
use crate::whitelist::TempWhitelist;

impl<S: StateStore> Storage<S> {
    /// Append `site` to the block list. Returns `false` if it was already
    /// there. Any bypass for it is dropped.
    pub async fn add_site(&self, site: &str) -> Result<bool, StorageError> {
        let mut sites = self.blocked_sites().await?;
        if sites.iter().any(|s| s == site) {
            return Ok(false);
        }

        sites.push(site.to_string());
        self.set_blocked_sites(&sites).await?;
        self.drop_whitelisted(site).await?;
        Ok(true)
    }

    /// Append every site not already listed, in order. One block list write
    /// and at most one whitelist write. Returns how many were added.
    pub async fn add_sites(&self, new_sites: &[String]) -> Result<usize, StorageError> {
        let mut sites = self.blocked_sites().await?;
        let before = sites.len();
        for site in new_sites {
            if !sites.contains(site) {
                sites.push(site.clone());
            }
        }

        let added = sites.len() - before;
        if added == 0 {
            return Ok(0);
        }
        self.set_blocked_sites(&sites).await?;

        let mut whitelist = self.temp_whitelist().await?;
        let mut pruned = false;
        for site in &sites[before..] {
            if whitelist.is_whitelisted(site) {
                whitelist.remove(site);
                pruned = true;
            }
        }
        if pruned {
            self.save_temp_whitelist(&whitelist).await?;
        }
        Ok(added)
    }

    /// Remove every occurrence of `site` from the block list, along with any
    /// bypass for it.
    pub async fn remove_site(&self, site: &str) -> Result<(), StorageError> {
        let sites: Vec<String> = self
            .blocked_sites()
            .await?
            .into_iter()
            .filter(|s| s != site)
            .collect();

        self.set_blocked_sites(&sites).await?;
        self.drop_whitelisted(site).await?;
        Ok(())
    }

    /// Default list, enabled, no bypasses.
    pub async fn reset_to_defaults(&self, default_sites: &[String]) -> Result<(), StorageError> {
        let mut items = Map::new();
        items.insert(BLOCKED_SITES_KEY.to_string(), Value::from(default_sites.to_vec()));
        items.insert(IS_ENABLED_KEY.to_string(), Value::Bool(true));
        self.store().set(Scope::Sync, items).await?;
        self.save_temp_whitelist(&TempWhitelist::new()).await
    }

    /// Unblock `site` until `now + 30 minutes`. Returns the expiry.
    pub async fn grant_bypass(&self, site: &str, now: u64) -> Result<u64, StorageError> {
        let expires_at = now + BYPASS_DURATION_MS;
        let mut whitelist = self.temp_whitelist().await?;
        whitelist.insert(site, expires_at);
        self.save_temp_whitelist(&whitelist).await?;
        Ok(expires_at)
    }

    /// End a bypass early ("Block Now"). Returns whether there was one.
    pub async fn revoke_bypass(&self, site: &str) -> Result<bool, StorageError> {
        let mut whitelist = self.temp_whitelist().await?;
        if whitelist.remove(site).is_none() {
            return Ok(false);
        }
        self.save_temp_whitelist(&whitelist).await?;
        Ok(true)
    }

    // Only rewrites the whitelist when the entry is live (truthy).
    async fn drop_whitelisted(&self, site: &str) -> Result<(), StorageError> {
        let mut whitelist = self.temp_whitelist().await?;
        if whitelist.is_whitelisted(site) {
            whitelist.remove(site);
            self.save_temp_whitelist(&whitelist).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_blocked_sites, TEMP_WHITELIST_KEY};
    use crate::storage::MemoryStore;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    #[tokio::test]
    async fn test_add_site_rejects_duplicates() {
        let storage = Storage::new(MemoryStore::new());
        assert!(storage.add_site("x.com").await.unwrap());
        assert!(!storage.add_site("x.com").await.unwrap());
        assert_eq!(storage.blocked_sites().await.unwrap(), vec!["x.com".to_string()]);
    }

    #[tokio::test]
    async fn test_add_site_clears_bypass() {
        let store = MemoryStore::new().with_value(Scope::Local, TEMP_WHITELIST_KEY, json!({ "x.com": NOW }));
        let storage = Storage::new(store);
        storage.add_site("x.com").await.unwrap();
        assert!(storage.temp_whitelist().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_site_removes_all_copies() {
        let storage = Storage::new(MemoryStore::new());
        storage
            .set_blocked_sites(&["a.com".to_string(), "b.com".to_string(), "a.com".to_string()])
            .await
            .unwrap();
        storage.grant_bypass("a.com", NOW).await.unwrap();

        storage.remove_site("a.com").await.unwrap();
        assert_eq!(storage.blocked_sites().await.unwrap(), vec!["b.com".to_string()]);
        assert!(storage.temp_whitelist().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_site_leaves_unrelated_whitelist_untouched() {
        let storage = Storage::new(MemoryStore::new());
        storage.grant_bypass("b.com", NOW).await.unwrap();
        storage.store().clear_writes();

        storage.remove_site("a.com").await.unwrap();
        let writes = storage.store().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, Scope::Sync);
    }

    #[tokio::test]
    async fn test_grant_and_revoke_bypass() {
        let storage = Storage::new(MemoryStore::new());
        let expires = storage.grant_bypass("x.com", NOW).await.unwrap();
        assert_eq!(expires, NOW + 30 * 60 * 1000);
        assert_eq!(storage.temp_whitelist().await.unwrap().get("x.com"), Some(expires));

        assert!(storage.revoke_bypass("x.com").await.unwrap());
        assert!(!storage.revoke_bypass("x.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_to_defaults() {
        let storage = Storage::new(MemoryStore::new());
        storage.set_blocked_sites(&["mine.com".to_string()]).await.unwrap();
        storage.set_enabled(false).await.unwrap();
        storage.grant_bypass("reddit.com", NOW).await.unwrap();

        storage.reset_to_defaults(&default_blocked_sites()).await.unwrap();
        let state = storage.sync_state().await.unwrap();
        assert_eq!(state.blocked_sites.len(), 12);
        assert!(state.is_enabled);
        assert!(storage.temp_whitelist().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_to_defaults_writes_sync_once() {
        let storage = Storage::new(MemoryStore::new());
        storage.set_enabled(false).await.unwrap();
        storage.store().clear_writes();

        storage.reset_to_defaults(&default_blocked_sites()).await.unwrap();
        let sync_writes: Vec<_> = storage
            .store()
            .writes()
            .into_iter()
            .filter(|(scope, _)| *scope == Scope::Sync)
            .collect();
        assert_eq!(sync_writes.len(), 1);
        assert_eq!(sync_writes[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_add_sites_batches_large_import() {
        let storage = Storage::new(MemoryStore::new());
        storage.set_blocked_sites(&["site0.com".to_string()]).await.unwrap();
        storage.grant_bypass("site1.com", NOW).await.unwrap();
        storage.grant_bypass("other.com", NOW).await.unwrap();
        storage.store().clear_writes();

        let mut import: Vec<String> = (0..200).map(|i| format!("site{}.com", i)).collect();
        import.push("site5.com".to_string());
        let added = storage.add_sites(&import).await.unwrap();

        assert_eq!(added, 199);
        let writes = storage.store().writes();
        assert_eq!(writes.iter().filter(|(scope, _)| *scope == Scope::Sync).count(), 1);
        assert_eq!(writes.iter().filter(|(scope, _)| *scope == Scope::Local).count(), 1);

        let sites = storage.blocked_sites().await.unwrap();
        assert_eq!(sites.len(), 200);
        assert_eq!(sites[1], "site1.com");
        let whitelist = storage.temp_whitelist().await.unwrap();
        assert_eq!(whitelist.get("site1.com"), None);
        assert!(whitelist.get("other.com").is_some());
    }

    #[tokio::test]
    async fn test_add_sites_nothing_new_writes_nothing() {
        let storage = Storage::new(MemoryStore::new());
        storage.set_blocked_sites(&["x.com".to_string()]).await.unwrap();
        storage.store().clear_writes();

        assert_eq!(storage.add_sites(&["x.com".to_string()]).await.unwrap(), 0);
        assert!(storage.store().writes().is_empty());
    }
}
