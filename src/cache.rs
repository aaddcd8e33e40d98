//! # Cache Store
//!
//! Three read tiers over the append-only cache table, probed in strict order:
//!
//! 1. **Valid**: this account, this identity, this request shape, not expired
//! 2. **History**: same key, latest entry regardless of expiry
//! 3. **Global history**: same identity and request shape stored under another account
//!
//! Every candidate must also satisfy the caller's [`PayloadRequirement`]. A rejected
//! candidate falls through to the next tier. Hits bump `hit_count`/`last_hit_at` on a
//! detached task so the caller never waits on the write.

use crate::config::CacheTtlConfig;
use crate::error::RelayResult;
use crate::fingerprint::RequestFingerprint;
use crate::identity::IdentityHash;
use crate::models::{CacheEntry, NewCacheEntry};
use crate::store::{CacheCounts, CacheKey, FetchStore};
use crate::targets::ttl_for;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheTier {
    Valid,
    History,
    GlobalHistory,
}

impl CacheTier {
    /// Probe order
    pub const ORDER: [CacheTier; 3] = [CacheTier::Valid, CacheTier::History, CacheTier::GlobalHistory];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Valid => "valid",
            CacheTier::History => "history",
            CacheTier::GlobalHistory => "globalHistory",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub tier: CacheTier,
    pub entry: CacheEntry,
}

/// Completeness predicate applied to every cache candidate
pub trait PayloadRequirement: Send + Sync + fmt::Debug {
    fn is_satisfied_by(&self, payload: &serde_json::Value) -> bool;
}

/// Accepts any stored payload
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPayload;

impl PayloadRequirement for AnyPayload {
    fn is_satisfied_by(&self, _payload: &serde_json::Value) -> bool {
        true
    }
}

/// Requires a JSON object carrying every listed key with a non-null value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiresFields(Vec<String>);

impl RequiresFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

impl PayloadRequirement for RequiresFields {
    fn is_satisfied_by(&self, payload: &serde_json::Value) -> bool {
        let Some(object) = payload.as_object() else {
            return false;
        };
        self.0
            .iter()
            .all(|field| object.get(field).is_some_and(|value| !value.is_null()))
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    store: Arc<dyn FetchStore>,
    ttl: CacheTtlConfig,
}

impl CacheStore {
    pub fn new(store: Arc<dyn FetchStore>, ttl: CacheTtlConfig) -> Self {
        Self { store, ttl }
    }

    /// Probe the tiers in order and bump the hit counters of the winner
    pub async fn lookup(
        &self,
        key: &CacheKey,
        requirement: &dyn PayloadRequirement,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<CacheHit>> {
        let hit = self.probe(key, requirement, now).await?;
        if let Some(hit) = &hit {
            self.spawn_hit_bump(hit.entry.cache_entry_uuid, now);
        }
        Ok(hit)
    }

    /// Same tier walk as [`lookup`](Self::lookup) without touching hit counters
    pub async fn probe(
        &self,
        key: &CacheKey,
        requirement: &dyn PayloadRequirement,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<CacheHit>> {
        let mut rejected: Vec<Uuid> = Vec::new();

        for tier in CacheTier::ORDER {
            let candidate = match tier {
                CacheTier::Valid => self.store.find_valid_cache_entry(key, now).await?,
                CacheTier::History => self.store.find_latest_cache_entry(key).await?,
                CacheTier::GlobalHistory => self.store.find_latest_shared_cache_entry(key).await?,
            };

            let Some(entry) = candidate else {
                continue;
            };
            if rejected.contains(&entry.cache_entry_uuid) {
                continue;
            }
            if !requirement.is_satisfied_by(&entry.payload) {
                debug!(
                    account_id = %key.account_id,
                    tier = %tier,
                    cache_entry_uuid = %entry.cache_entry_uuid,
                    "Cache candidate rejected by payload requirement"
                );
                rejected.push(entry.cache_entry_uuid);
                continue;
            }

            return Ok(Some(CacheHit { tier, entry }));
        }

        Ok(None)
    }

    /// Append a new entry; expiry follows the shortest TTL among the requested targets
    pub async fn put(
        &self,
        account_id: &str,
        identity_hash: &IdentityHash,
        fingerprint: &RequestFingerprint,
        status_code: i32,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
    ) -> RelayResult<CacheEntry> {
        let expires_at = fetched_at + ttl_for(&fingerprint.normalized_targets, &self.ttl);
        self.store
            .insert_cache_entry(NewCacheEntry {
                account_id: account_id.to_string(),
                identity_hash: identity_hash.clone(),
                fingerprint: fingerprint.clone(),
                status_code,
                payload,
                fetched_at,
                expires_at,
            })
            .await
    }

    pub async fn counts(
        &self,
        account_id: &str,
        identity_hash: Option<&IdentityHash>,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheCounts> {
        self.store
            .count_cache_entries(account_id, identity_hash, now)
            .await
    }

    fn spawn_hit_bump(&self, cache_entry_uuid: Uuid, at: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.record_cache_hit(cache_entry_uuid, at).await {
                warn!(
                    cache_entry_uuid = %cache_entry_uuid,
                    error = %e,
                    "Failed to record cache hit"
                );
            }
        });
    }
}
