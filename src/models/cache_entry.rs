//! # Cache Entry Model
//!
//! A stored upstream payload for one `(account, identity, request)` shape.
//!
//! Entries are append-only. Only `last_hit_at`/`hit_count` change after insert, and
//! those bumps are commutative. `expires_at` decides membership in the valid tier
//! only; expired entries stay visible to the history tiers.
//!
//! ## Database Schema
//!
//! Maps to `relay_fetch_cache` (see `migrations/0001_fetch_resilience.sql`).

use crate::fingerprint::RequestFingerprint;
use crate::identity::IdentityHash;
use crate::targets::FetchTarget;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub cache_entry_uuid: Uuid,
    pub account_id: String,
    pub identity_hash: String,
    pub request_hash: String,
    pub request_key: String,
    pub targets: Vec<FetchTarget>,
    pub year_limit: i32,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub subject_type: String,
    pub status_code: i32,
    /// Normalized upstream payload; never interpreted by the relay
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub hit_count: i64,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Insert payload for a new cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheEntry {
    pub account_id: String,
    pub identity_hash: IdentityHash,
    pub fingerprint: RequestFingerprint,
    pub status_code: i32,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewCacheEntry {
    /// Materialize the row as it will be stored
    pub fn into_entry(self, cache_entry_uuid: Uuid) -> CacheEntry {
        CacheEntry {
            cache_entry_uuid,
            account_id: self.account_id,
            identity_hash: self.identity_hash.into_inner(),
            request_hash: self.fingerprint.request_hash,
            request_key: self.fingerprint.request_key,
            targets: self.fingerprint.normalized_targets,
            year_limit: self.fingerprint.year_limit,
            from_date: self.fingerprint.from_date,
            to_date: self.fingerprint.to_date,
            subject_type: self.fingerprint.subject_type,
            status_code: self.status_code,
            payload: self.payload,
            fetched_at: self.fetched_at,
            expires_at: self.expires_at,
            last_hit_at: None,
            hit_count: 0,
        }
    }
}
