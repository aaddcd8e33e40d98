//! # Persistence Port
//!
//! Minimal storage contract for cache entries, fetch attempts and provider links.
//! Implementations only need atomic single-row writes, range queries on
//! `created_at`/`fetched_at`, and lookups on `(account_id, identity_hash, request_hash)`.
//!
//! Budget counters are derived by counting rows, never held in memory, so several
//! relay processes can share one store.
//!
//! - [`InMemoryFetchStore`]: process-local tables, used by tests and single-node setups
//! - [`PgFetchStore`]: PostgreSQL via SQLx (feature `postgres`)

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::RelayResult;
use crate::identity::IdentityHash;
use crate::models::{
    AttemptWindow, CacheEntry, FetchAttempt, FetchLinkUpdate, NewCacheEntry, NewFetchAttempt,
    ProviderLink,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use in_memory::InMemoryFetchStore;
#[cfg(feature = "postgres")]
pub use postgres::PgFetchStore;

/// Cache lookup key: who is asking, for whom, for what shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub account_id: String,
    pub identity_hash: IdentityHash,
    pub request_hash: String,
}

impl CacheKey {
    pub fn new(
        account_id: impl Into<String>,
        identity_hash: IdentityHash,
        request_hash: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            identity_hash,
            request_hash: request_hash.into(),
        }
    }

    /// Single-flight key: `account_id|request_hash`
    pub fn flight_key(&self) -> String {
        format!("{}|{}", self.account_id, self.request_hash)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCounts {
    pub total: i64,
    pub valid: i64,
}

#[async_trait]
pub trait FetchStore: Send + Sync + std::fmt::Debug {
    /// Append a cache entry; never overwrites an existing one
    async fn insert_cache_entry(&self, entry: NewCacheEntry) -> RelayResult<CacheEntry>;

    /// Latest entry for the exact key with `now < expires_at`
    async fn find_valid_cache_entry(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<CacheEntry>>;

    /// Latest entry for the exact key, expired or not
    async fn find_latest_cache_entry(&self, key: &CacheKey) -> RelayResult<Option<CacheEntry>>;

    /// Latest entry for `(identity_hash, request_hash)` stored under any account
    /// other than `key.account_id`
    async fn find_latest_shared_cache_entry(
        &self,
        key: &CacheKey,
    ) -> RelayResult<Option<CacheEntry>>;

    /// Bump `hit_count` and set `last_hit_at`
    async fn record_cache_hit(&self, cache_entry_uuid: Uuid, at: DateTime<Utc>)
        -> RelayResult<()>;

    /// Entries stored for an account, optionally restricted to one identity
    async fn count_cache_entries(
        &self,
        account_id: &str,
        identity_hash: Option<&IdentityHash>,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheCounts>;

    async fn insert_attempt(&self, attempt: NewFetchAttempt) -> RelayResult<FetchAttempt>;

    async fn count_attempts(&self, window: &AttemptWindow) -> RelayResult<i64>;

    async fn earliest_attempt_at(
        &self,
        window: &AttemptWindow,
    ) -> RelayResult<Option<DateTime<Utc>>>;

    async fn latest_attempt_at(&self, window: &AttemptWindow)
        -> RelayResult<Option<DateTime<Utc>>>;

    /// Most recent attempts for an account, newest first, cached ones included
    async fn list_attempts(&self, account_id: &str, limit: i64) -> RelayResult<Vec<FetchAttempt>>;

    async fn find_provider_link(
        &self,
        account_id: &str,
        provider: &str,
    ) -> RelayResult<Option<ProviderLink>>;

    /// Insert or replace the link row for `(account_id, provider)`
    async fn upsert_provider_link(&self, link: ProviderLink) -> RelayResult<ProviderLink>;

    /// Apply fetch bookkeeping, creating an unlinked row if none exists yet
    async fn apply_fetch_update(&self, update: &FetchLinkUpdate) -> RelayResult<ProviderLink>;
}
