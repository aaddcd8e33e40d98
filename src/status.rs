//! # Status Surface
//!
//! Read-only view of an account's relay state for UI collaborators: link state,
//! cooldown, target policy, cache summary and budget. Nothing here writes to the
//! store; cache tiers are probed without bumping hit counters.

use crate::budget::{BudgetLedger, BudgetSnapshot, CooldownGate, CooldownState};
use crate::cache::{AnyPayload, CacheStore, CacheTier};
use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::fingerprint::RequestFingerprinter;
use crate::identity::{IdentityHash, IdentityResolver, LinkedIdentity};
use crate::models::LinkError;
use crate::store::{CacheKey, FetchStore};
use crate::targets::{FetchTarget, TargetPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Where the summary payload would be served from right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SummarySource {
    Valid,
    History,
    GlobalHistory,
    None,
}

impl From<CacheTier> for SummarySource {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Valid => SummarySource::Valid,
            CacheTier::History => SummarySource::History,
            CacheTier::GlobalHistory => SummarySource::GlobalHistory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPolicyStatus {
    pub high_cost_enabled: bool,
    pub allowed_targets: Vec<FetchTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub total_entries: i64,
    pub valid_entries: i64,
    pub summary_available: bool,
    pub summary_source: SummarySource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub provider: String,
    pub linked: bool,
    pub last_linked_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<LinkError>,
    pub has_session: bool,
    pub cooldown: CooldownState,
    pub target_policy: TargetPolicyStatus,
    pub cache: CacheSummary,
    pub budget: BudgetSnapshot,
}

#[derive(Debug, Clone)]
pub struct StatusService {
    config: RelayConfig,
    store: Arc<dyn FetchStore>,
    resolver: IdentityResolver,
    fingerprinter: RequestFingerprinter,
    policy: TargetPolicy,
    ledger: BudgetLedger,
    cooldown: CooldownGate,
    cache: CacheStore,
    summary_targets: Vec<FetchTarget>,
    summary_subject: String,
}

impl StatusService {
    pub fn new(config: RelayConfig, store: Arc<dyn FetchStore>) -> Self {
        Self {
            resolver: IdentityResolver::new(),
            fingerprinter: RequestFingerprinter::new(config.fingerprint.clone()),
            policy: TargetPolicy::new(&config.targets),
            ledger: BudgetLedger::new(Arc::clone(&store), config.budget.clone()),
            cooldown: CooldownGate::new(Arc::clone(&store), config.cooldown.clone()),
            cache: CacheStore::new(Arc::clone(&store), config.cache.clone()),
            summary_targets: vec![FetchTarget::CheckupOverview],
            summary_subject: "self".to_string(),
            config,
            store,
        }
    }

    /// Request shape probed for `summaryAvailable`
    pub fn with_summary_request(
        mut self,
        targets: impl IntoIterator<Item = FetchTarget>,
        subject_type: impl Into<String>,
    ) -> Self {
        self.summary_targets = targets.into_iter().collect();
        self.summary_subject = subject_type.into();
        self
    }

    /// Status for `account_id`. Without `identity`, the identity hash of the last
    /// fetch recorded on the provider link is used for the cache probe.
    pub async fn status(
        &self,
        account_id: &str,
        identity: Option<&LinkedIdentity>,
    ) -> RelayResult<RelayStatus> {
        let now = Utc::now();
        let link = self
            .store
            .find_provider_link(account_id, &self.config.provider.name)
            .await?;

        let identity_hash = match identity {
            Some(identity) => Some(self.resolver.resolve(account_id, identity)),
            None => link
                .as_ref()
                .and_then(|link| link.last_identity_hash.clone())
                .map(IdentityHash::from_stored),
        };

        let cache = self
            .cache_summary(account_id, identity_hash.as_ref(), now)
            .await?;
        let cooldown = self.cooldown.state(account_id, now).await?;
        let budget = self.ledger.snapshot(account_id, now).await?;

        let last_error = link.as_ref().and_then(|link| {
            link.last_error_code.as_ref().map(|code| LinkError {
                code: code.clone(),
                message: link.last_error_message.clone().unwrap_or_default(),
            })
        });

        Ok(RelayStatus {
            provider: self.config.provider.name.clone(),
            linked: link.as_ref().is_some_and(|link| link.linked),
            last_linked_at: link.as_ref().and_then(|link| link.last_linked_at),
            last_fetched_at: link.as_ref().and_then(|link| link.last_fetched_at),
            last_error,
            has_session: link.as_ref().is_some_and(|link| link.has_session()),
            cooldown,
            target_policy: TargetPolicyStatus {
                high_cost_enabled: self.policy.high_cost_enabled(),
                allowed_targets: self.policy.allowed_targets(),
            },
            cache,
            budget,
        })
    }

    async fn cache_summary(
        &self,
        account_id: &str,
        identity_hash: Option<&IdentityHash>,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheSummary> {
        let counts = self.cache.counts(account_id, identity_hash, now).await?;

        let selection = self.policy.apply(&self.summary_targets);
        let source = match identity_hash {
            Some(identity_hash) if !selection.is_empty() => {
                let fingerprint = self.fingerprinter.fingerprint(
                    &selection.allowed,
                    self.config.fingerprint.default_year_limit,
                    None,
                    None,
                    &self.summary_subject,
                );
                let key = CacheKey::new(account_id, identity_hash.clone(), fingerprint.request_hash);
                self.cache
                    .probe(&key, &AnyPayload, now)
                    .await?
                    .map_or(SummarySource::None, |hit| hit.tier.into())
            }
            _ => SummarySource::None,
        };

        Ok(CacheSummary {
            total_entries: counts.total,
            valid_entries: counts.valid,
            summary_available: source != SummarySource::None,
            summary_source: source,
        })
    }
}
