//! # Fetch Attempt Model
//!
//! Append-only audit trail and budget ledger. Exactly one row is written per fetch
//! decision that reached the cache or the network; budget and cooldown blocks are
//! pre-conditions and leave no row.
//!
//! Rows with `cached = true` are audit-only and never count against a budget.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE relay_fetch_attempts (
//!   fetch_attempt_uuid UUID PRIMARY KEY,
//!   account_id TEXT NOT NULL,
//!   provider TEXT NOT NULL,
//!   identity_hash TEXT NOT NULL,
//!   request_hash TEXT NOT NULL,
//!   request_key TEXT NOT NULL,
//!   force_refresh BOOLEAN NOT NULL,
//!   cached BOOLEAN NOT NULL,
//!   status_code INTEGER NOT NULL,
//!   ok BOOLEAN NOT NULL,
//!   created_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FetchAttempt {
    pub fetch_attempt_uuid: Uuid,
    pub account_id: String,
    pub provider: String,
    pub identity_hash: String,
    pub request_hash: String,
    pub request_key: String,
    pub force_refresh: bool,
    /// Served from a cache tier; excluded from budget counters
    pub cached: bool,
    pub status_code: i32,
    pub ok: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFetchAttempt {
    pub account_id: String,
    pub provider: String,
    pub identity_hash: String,
    pub request_hash: String,
    pub request_key: String,
    pub force_refresh: bool,
    pub cached: bool,
    pub status_code: i32,
    pub ok: bool,
    pub created_at: DateTime<Utc>,
}

impl NewFetchAttempt {
    pub fn into_attempt(self, fetch_attempt_uuid: Uuid) -> FetchAttempt {
        FetchAttempt {
            fetch_attempt_uuid,
            account_id: self.account_id,
            provider: self.provider,
            identity_hash: self.identity_hash,
            request_hash: self.request_hash,
            request_key: self.request_key,
            force_refresh: self.force_refresh,
            cached: self.cached,
            status_code: self.status_code,
            ok: self.ok,
            created_at: self.created_at,
        }
    }
}

/// Selects the non-cached attempts of one account, optionally bounded in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptWindow {
    pub account_id: String,
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
    /// Only attempts with `force_refresh = true`
    pub force_refresh_only: bool,
}

impl AttemptWindow {
    pub fn fresh(account_id: &str, since: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            since: Some(since),
            force_refresh_only: false,
        }
    }

    pub fn forced(account_id: &str, since: Option<DateTime<Utc>>) -> Self {
        Self {
            account_id: account_id.to_string(),
            since,
            force_refresh_only: true,
        }
    }

    /// Whether `attempt` is counted by this window
    pub fn matches(&self, attempt: &FetchAttempt) -> bool {
        attempt.account_id == self.account_id
            && !attempt.cached
            && (!self.force_refresh_only || attempt.force_refresh)
            && self.since.map_or(true, |since| attempt.created_at >= since)
    }
}
