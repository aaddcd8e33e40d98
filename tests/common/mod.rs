#![allow(dead_code)]

pub mod mock_executor;
pub mod strategies;

pub use mock_executor::*;

use checkup_relay::config::RelayConfig;
use checkup_relay::fingerprint::{RequestFingerprint, RequestFingerprinter};
use checkup_relay::identity::{IdentityHash, IdentityResolver, LinkedIdentity};
use checkup_relay::models::{CacheEntry, NewCacheEntry, NewFetchAttempt, ProviderLink, SessionBlob};
use checkup_relay::orchestrator::{FetchCommand, FetchOrchestrator};
use checkup_relay::store::{FetchStore, InMemoryFetchStore};
use checkup_relay::targets::FetchTarget;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub const PROVIDER: &str = "nhis";

/// Orchestrator wired to an in-memory store and a scripted executor
pub struct Harness {
    pub config: RelayConfig,
    pub store: Arc<InMemoryFetchStore>,
    pub executor: Arc<MockExecutor>,
    pub relay: FetchOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self::with_executor(config, MockExecutor::new())
    }

    pub fn with_executor(config: RelayConfig, executor: MockExecutor) -> Self {
        let store = Arc::new(InMemoryFetchStore::new());
        let executor = Arc::new(executor);
        let relay = FetchOrchestrator::new(config.clone(), store.clone(), executor.clone())
            .expect("test configuration is valid");
        Self {
            config,
            store,
            executor,
            relay,
        }
    }

    /// Give `account_id` a linked provider session
    pub async fn link(&self, account_id: &str) {
        self.store
            .upsert_provider_link(ProviderLink::linked(
                account_id,
                PROVIDER,
                Some(SessionBlob::new("step-token")),
                Some(SessionBlob::new("cookie=abc")),
                Utc::now(),
            ))
            .await
            .expect("link upsert");
    }

    pub fn fingerprint_for(&self, command: &FetchCommand) -> RequestFingerprint {
        RequestFingerprinter::new(self.config.fingerprint.clone()).fingerprint(
            &command.targets,
            command.year_limit,
            command.from_date,
            command.to_date,
            &command.subject_type,
        )
    }

    pub fn identity_hash_for(&self, command: &FetchCommand) -> IdentityHash {
        IdentityResolver::new().resolve(&command.account_id, &command.identity)
    }

    /// Store a cache entry matching `command` directly, bypassing the relay
    pub async fn seed_cache(
        &self,
        command: &FetchCommand,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> CacheEntry {
        self.store
            .insert_cache_entry(NewCacheEntry {
                account_id: command.account_id.clone(),
                identity_hash: self.identity_hash_for(command),
                fingerprint: self.fingerprint_for(command),
                status_code: 200,
                payload,
                fetched_at,
                expires_at,
            })
            .await
            .expect("cache insert")
    }

    /// Record `count` network attempts for `account_id`, `ago` in the past
    pub async fn seed_attempts(&self, account_id: &str, count: usize, forced: bool, ago: Duration) {
        for _ in 0..count {
            self.store
                .insert_attempt(NewFetchAttempt {
                    account_id: account_id.to_string(),
                    provider: PROVIDER.to_string(),
                    identity_hash: "seeded".to_string(),
                    request_hash: "seeded".to_string(),
                    request_key: "seeded".to_string(),
                    force_refresh: forced,
                    cached: false,
                    status_code: 200,
                    ok: true,
                    created_at: Utc::now() - ago,
                })
                .await
                .expect("attempt insert");
        }
    }

    pub fn network_attempts(&self) -> usize {
        self.store.attempts().iter().filter(|a| !a.cached).count()
    }
}

pub fn identity() -> LinkedIdentity {
    LinkedIdentity::new("Hong Gildong", "1980-01-01", "010-1234-5678", "kakao")
}

pub fn overview(account_id: &str) -> FetchCommand {
    FetchCommand::new(account_id, identity(), [FetchTarget::CheckupOverview])
}
