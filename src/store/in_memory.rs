//! # In-Memory Fetch Store
//!
//! Process-local implementation of [`FetchStore`]. Rows live in plain vectors
//! behind a `parking_lot` lock that is never held across an await point.

use super::{CacheCounts, CacheKey, FetchStore};
use crate::error::RelayResult;
use crate::identity::IdentityHash;
use crate::models::{
    AttemptWindow, CacheEntry, FetchAttempt, FetchLinkUpdate, NewCacheEntry, NewFetchAttempt,
    ProviderLink,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    cache: Vec<CacheEntry>,
    attempts: Vec<FetchAttempt>,
    links: HashMap<(String, String), ProviderLink>,
}

#[derive(Debug, Default)]
pub struct InMemoryFetchStore {
    tables: RwLock<Tables>,
}

impl InMemoryFetchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cache entry, oldest first
    pub fn cache_entries(&self) -> Vec<CacheEntry> {
        self.tables.read().cache.clone()
    }

    /// Every attempt, oldest first
    pub fn attempts(&self) -> Vec<FetchAttempt> {
        self.tables.read().attempts.clone()
    }

    fn latest_matching<F>(&self, predicate: F) -> Option<CacheEntry>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let tables = self.tables.read();
        // max_by_key keeps the last maximum, so later inserts win ties
        tables
            .cache
            .iter()
            .filter(|entry| predicate(entry))
            .max_by_key(|entry| entry.fetched_at)
            .cloned()
    }
}

fn same_shape(entry: &CacheEntry, key: &CacheKey) -> bool {
    entry.identity_hash == key.identity_hash.as_str() && entry.request_hash == key.request_hash
}

#[async_trait]
impl FetchStore for InMemoryFetchStore {
    async fn insert_cache_entry(&self, entry: NewCacheEntry) -> RelayResult<CacheEntry> {
        let entry = entry.into_entry(Uuid::new_v4());
        self.tables.write().cache.push(entry.clone());
        Ok(entry)
    }

    async fn find_valid_cache_entry(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<CacheEntry>> {
        Ok(self.latest_matching(|entry| {
            entry.account_id == key.account_id && same_shape(entry, key) && entry.is_valid_at(now)
        }))
    }

    async fn find_latest_cache_entry(&self, key: &CacheKey) -> RelayResult<Option<CacheEntry>> {
        Ok(self.latest_matching(|entry| entry.account_id == key.account_id && same_shape(entry, key)))
    }

    async fn find_latest_shared_cache_entry(
        &self,
        key: &CacheKey,
    ) -> RelayResult<Option<CacheEntry>> {
        Ok(self.latest_matching(|entry| entry.account_id != key.account_id && same_shape(entry, key)))
    }

    async fn record_cache_hit(
        &self,
        cache_entry_uuid: Uuid,
        at: DateTime<Utc>,
    ) -> RelayResult<()> {
        let mut tables = self.tables.write();
        if let Some(entry) = tables
            .cache
            .iter_mut()
            .find(|entry| entry.cache_entry_uuid == cache_entry_uuid)
        {
            entry.hit_count += 1;
            entry.last_hit_at = Some(entry.last_hit_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }

    async fn count_cache_entries(
        &self,
        account_id: &str,
        identity_hash: Option<&IdentityHash>,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheCounts> {
        let tables = self.tables.read();
        let mut counts = CacheCounts::default();
        for entry in tables.cache.iter().filter(|entry| {
            entry.account_id == account_id
                && identity_hash.map_or(true, |hash| entry.identity_hash == hash.as_str())
        }) {
            counts.total += 1;
            if entry.is_valid_at(now) {
                counts.valid += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_attempt(&self, attempt: NewFetchAttempt) -> RelayResult<FetchAttempt> {
        let attempt = attempt.into_attempt(Uuid::new_v4());
        self.tables.write().attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn count_attempts(&self, window: &AttemptWindow) -> RelayResult<i64> {
        let tables = self.tables.read();
        let count = tables.attempts.iter().filter(|a| window.matches(a)).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn earliest_attempt_at(
        &self,
        window: &AttemptWindow,
    ) -> RelayResult<Option<DateTime<Utc>>> {
        let tables = self.tables.read();
        Ok(tables
            .attempts
            .iter()
            .filter(|a| window.matches(a))
            .map(|a| a.created_at)
            .min())
    }

    async fn latest_attempt_at(
        &self,
        window: &AttemptWindow,
    ) -> RelayResult<Option<DateTime<Utc>>> {
        let tables = self.tables.read();
        Ok(tables
            .attempts
            .iter()
            .filter(|a| window.matches(a))
            .map(|a| a.created_at)
            .max())
    }

    async fn list_attempts(&self, account_id: &str, limit: i64) -> RelayResult<Vec<FetchAttempt>> {
        let tables = self.tables.read();
        let mut attempts: Vec<FetchAttempt> = tables
            .attempts
            .iter()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect();
        attempts.reverse();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        attempts.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(attempts)
    }

    async fn find_provider_link(
        &self,
        account_id: &str,
        provider: &str,
    ) -> RelayResult<Option<ProviderLink>> {
        let tables = self.tables.read();
        Ok(tables
            .links
            .get(&(account_id.to_string(), provider.to_string()))
            .cloned())
    }

    async fn upsert_provider_link(&self, link: ProviderLink) -> RelayResult<ProviderLink> {
        let key = (link.account_id.clone(), link.provider.clone());
        self.tables.write().links.insert(key, link.clone());
        Ok(link)
    }

    async fn apply_fetch_update(&self, update: &FetchLinkUpdate) -> RelayResult<ProviderLink> {
        let mut tables = self.tables.write();
        let link = tables
            .links
            .entry((update.account_id.clone(), update.provider.clone()))
            .or_insert_with(|| ProviderLink {
                account_id: update.account_id.clone(),
                provider: update.provider.clone(),
                linked: false,
                login_method: None,
                login_org_cd: None,
                step_data: None,
                cookie_data: None,
                last_linked_at: None,
                last_fetched_at: None,
                last_identity_hash: None,
                last_error_code: None,
                last_error_message: None,
                updated_at: update.updated_at,
            });
        link.apply(update);
        Ok(link.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintConfig;
    use crate::fingerprint::RequestFingerprinter;
    use crate::targets::FetchTarget;
    use chrono::Duration;

    fn new_entry(account: &str, identity: &str, fetched_at: DateTime<Utc>) -> NewCacheEntry {
        let fingerprint = RequestFingerprinter::new(FingerprintConfig::default()).fingerprint(
            &[FetchTarget::CheckupOverview],
            2,
            None,
            None,
            "self",
        );
        NewCacheEntry {
            account_id: account.to_string(),
            identity_hash: IdentityHash::from_stored(identity),
            fingerprint,
            status_code: 200,
            payload: serde_json::json!({ "items": [] }),
            fetched_at,
            expires_at: fetched_at + Duration::hours(1),
        }
    }

    fn attempt(account: &str, cached: bool, forced: bool, at: DateTime<Utc>) -> NewFetchAttempt {
        NewFetchAttempt {
            account_id: account.to_string(),
            provider: "nhis".to_string(),
            identity_hash: "id".to_string(),
            request_hash: "req".to_string(),
            request_key: "key".to_string(),
            force_refresh: forced,
            cached,
            status_code: 200,
            ok: true,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_cache_tiers_respect_expiry_and_account() {
        let store = InMemoryFetchStore::new();
        let now = Utc::now();
        let old = store
            .insert_cache_entry(new_entry("acct-1", "id-1", now - Duration::hours(3)))
            .await
            .unwrap();
        let other = store
            .insert_cache_entry(new_entry("acct-2", "id-1", now - Duration::minutes(5)))
            .await
            .unwrap();
        let key = CacheKey::new("acct-1", IdentityHash::from_stored("id-1"), &old.request_hash);

        assert!(store.find_valid_cache_entry(&key, now).await.unwrap().is_none());
        assert_eq!(
            store.find_latest_cache_entry(&key).await.unwrap().unwrap(),
            old
        );
        assert_eq!(
            store
                .find_latest_shared_cache_entry(&key)
                .await
                .unwrap()
                .unwrap(),
            other
        );
    }

    #[tokio::test]
    async fn test_record_cache_hit_bumps_counter() {
        let store = InMemoryFetchStore::new();
        let now = Utc::now();
        let entry = store
            .insert_cache_entry(new_entry("acct-1", "id-1", now))
            .await
            .unwrap();

        store.record_cache_hit(entry.cache_entry_uuid, now).await.unwrap();
        store
            .record_cache_hit(entry.cache_entry_uuid, now - Duration::seconds(5))
            .await
            .unwrap();

        let stored = &store.cache_entries()[0];
        assert_eq!(stored.hit_count, 2);
        assert_eq!(stored.last_hit_at, Some(now));
    }

    #[tokio::test]
    async fn test_attempt_windows_exclude_cached_rows() {
        let store = InMemoryFetchStore::new();
        let now = Utc::now();
        store.insert_attempt(attempt("acct-1", false, false, now - Duration::hours(30))).await.unwrap();
        store.insert_attempt(attempt("acct-1", false, true, now - Duration::hours(2))).await.unwrap();
        store.insert_attempt(attempt("acct-1", true, false, now - Duration::hours(1))).await.unwrap();
        store.insert_attempt(attempt("acct-2", false, false, now)).await.unwrap();

        let since = now - Duration::hours(24);
        let fresh = AttemptWindow::fresh("acct-1", since);
        assert_eq!(store.count_attempts(&fresh).await.unwrap(), 1);
        assert_eq!(
            store.earliest_attempt_at(&fresh).await.unwrap(),
            Some(now - Duration::hours(2))
        );

        let forced_ever = AttemptWindow::forced("acct-1", None);
        assert_eq!(store.count_attempts(&forced_ever).await.unwrap(), 1);
        assert_eq!(store.list_attempts("acct-1", 10).await.unwrap().len(), 3);
        assert!(store.list_attempts("acct-1", 1).await.unwrap()[0].cached);
    }

    #[tokio::test]
    async fn test_apply_fetch_update_upserts_single_row() {
        let store = InMemoryFetchStore::new();
        let now = Utc::now();
        let update = FetchLinkUpdate {
            account_id: "acct-1".into(),
            provider: "nhis".into(),
            identity_hash: "id-1".into(),
            fetched_at: Some(now),
            error: None,
            updated_at: now,
        };
        let created = store.apply_fetch_update(&update).await.unwrap();
        assert!(!created.linked);

        store.apply_fetch_update(&update).await.unwrap();
        let found = store.find_provider_link("acct-1", "nhis").await.unwrap().unwrap();
        assert_eq!(found.last_fetched_at, Some(now));
        assert_eq!(store.tables.read().links.len(), 1);
    }
}
