//! # Persistence Writer
//!
//! Commits the side effects of a fetch decision. Each commit is a short sequence of
//! single-row writes; there is no surrounding transaction.
//!
//! | Outcome      | Cache entry | Attempt                         | Provider link            |
//! |--------------|-------------|---------------------------------|--------------------------|
//! | success      | appended    | `cached=false, ok=true, 200`    | `last_fetched_at`, error cleared |
//! | failure      | none        | `cached=false, ok=false`        | error fields set         |
//! | cache hit    | none        | `cached=true, ok=true`          | untouched                |
//!
//! The cache entry is written first so it is visible to lookups before the caller
//! sees the success.

use crate::cache::{CacheHit, CacheStore};
use crate::classification::ClassifiedFailure;
use crate::error::RelayResult;
use crate::fingerprint::RequestFingerprint;
use crate::identity::IdentityHash;
use crate::logging::log_store_operation;
use crate::models::{CacheEntry, FetchAttempt, FetchLinkUpdate, LinkError, NewFetchAttempt};
use crate::store::FetchStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const SUCCESS_STATUS: i32 = 200;

/// Who fetched what, shared by every commit for one request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchContext {
    pub account_id: String,
    pub identity_hash: IdentityHash,
    pub fingerprint: RequestFingerprint,
    pub force_refresh: bool,
}

impl FetchContext {
    fn attempt(
        &self,
        provider: &str,
        cached: bool,
        status_code: i32,
        ok: bool,
        at: DateTime<Utc>,
    ) -> NewFetchAttempt {
        NewFetchAttempt {
            account_id: self.account_id.clone(),
            provider: provider.to_string(),
            identity_hash: self.identity_hash.as_str().to_string(),
            request_hash: self.fingerprint.request_hash.clone(),
            request_key: self.fingerprint.request_key.clone(),
            force_refresh: self.force_refresh,
            cached,
            status_code,
            ok,
            created_at: at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn FetchStore>,
    cache: CacheStore,
    provider: String,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn FetchStore>, cache: CacheStore, provider: impl Into<String>) -> Self {
        Self {
            store,
            cache,
            provider: provider.into(),
        }
    }

    pub async fn commit_success(
        &self,
        context: &FetchContext,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheEntry> {
        let entry = self
            .cache
            .put(
                &context.account_id,
                &context.identity_hash,
                &context.fingerprint,
                SUCCESS_STATUS,
                payload,
                now,
            )
            .await?;

        self.store
            .insert_attempt(context.attempt(&self.provider, false, SUCCESS_STATUS, true, now))
            .await?;

        self.store
            .apply_fetch_update(&FetchLinkUpdate {
                account_id: context.account_id.clone(),
                provider: self.provider.clone(),
                identity_hash: context.identity_hash.as_str().to_string(),
                fetched_at: Some(now),
                error: None,
                updated_at: now,
            })
            .await?;

        log_store_operation(
            "commit_success",
            "relay_fetch_cache",
            &context.account_id,
            "committed",
            Some(&context.fingerprint.request_key),
        );
        Ok(entry)
    }

    pub async fn commit_failure(
        &self,
        context: &FetchContext,
        failure: &ClassifiedFailure,
        now: DateTime<Utc>,
    ) -> RelayResult<FetchAttempt> {
        let attempt = self
            .store
            .insert_attempt(context.attempt(&self.provider, false, failure.status_code, false, now))
            .await?;

        self.store
            .apply_fetch_update(&FetchLinkUpdate {
                account_id: context.account_id.clone(),
                provider: self.provider.clone(),
                identity_hash: context.identity_hash.as_str().to_string(),
                fetched_at: None,
                error: Some(LinkError {
                    code: failure.code.clone(),
                    message: failure.message.clone(),
                }),
                updated_at: now,
            })
            .await?;

        log_store_operation(
            "commit_failure",
            "relay_fetch_attempts",
            &context.account_id,
            "committed",
            Some(&failure.code),
        );
        Ok(attempt)
    }

    /// Audit row for a request served from cache; never counted against the budget
    pub async fn record_cache_hit(
        &self,
        context: &FetchContext,
        hit: &CacheHit,
        now: DateTime<Utc>,
    ) -> RelayResult<FetchAttempt> {
        self.store
            .insert_attempt(context.attempt(&self.provider, true, hit.entry.status_code, true, now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AnyPayload, CacheTier};
    use crate::classification::FailureKind;
    use crate::config::{CacheTtlConfig, FingerprintConfig};
    use crate::fingerprint::RequestFingerprinter;
    use crate::store::{CacheKey, InMemoryFetchStore};
    use crate::targets::FetchTarget;
    use serde_json::json;

    fn setup() -> (Arc<InMemoryFetchStore>, PersistenceWriter, FetchContext) {
        let store = Arc::new(InMemoryFetchStore::new());
        let cache = CacheStore::new(store.clone(), CacheTtlConfig::default());
        let writer = PersistenceWriter::new(store.clone(), cache, "nhis");
        let context = FetchContext {
            account_id: "acct-1".into(),
            identity_hash: IdentityHash::from_stored("id-1"),
            fingerprint: RequestFingerprinter::new(FingerprintConfig::default()).fingerprint(
                &[FetchTarget::CheckupOverview],
                2,
                None,
                None,
                "self",
            ),
            force_refresh: false,
        };
        (store, writer, context)
    }

    #[tokio::test]
    async fn test_success_writes_entry_attempt_and_link() {
        let (store, writer, context) = setup();
        let now = Utc::now();
        let entry = writer
            .commit_success(&context, json!({"items": [1]}), now)
            .await
            .unwrap();

        let key = CacheKey::new("acct-1", context.identity_hash.clone(), &context.fingerprint.request_hash);
        let hit = CacheStore::new(store.clone(), CacheTtlConfig::default())
            .probe(&key, &AnyPayload, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.tier, CacheTier::Valid);
        assert_eq!(hit.entry.cache_entry_uuid, entry.cache_entry_uuid);

        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].ok && !attempts[0].cached);
        assert_eq!(attempts[0].status_code, 200);

        let link = store.find_provider_link("acct-1", "nhis").await.unwrap().unwrap();
        assert_eq!(link.last_fetched_at, Some(now));
        assert!(link.last_error_code.is_none());
    }

    #[tokio::test]
    async fn test_failure_writes_no_cache_entry() {
        let (store, writer, context) = setup();
        let failure = ClassifiedFailure {
            kind: FailureKind::Upstream,
            code: "CF-500".into(),
            message: "provider unavailable".into(),
            status_code: 502,
            reauth_required: false,
            retryable: true,
        };
        writer
            .commit_failure(&context, &failure, Utc::now())
            .await
            .unwrap();

        assert!(store.cache_entries().is_empty());
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].ok);
        assert_eq!(attempts[0].status_code, 502);

        let link = store.find_provider_link("acct-1", "nhis").await.unwrap().unwrap();
        assert_eq!(link.last_error_code.as_deref(), Some("CF-500"));
        assert!(link.last_fetched_at.is_none());
    }
}
