//! # Fetch Orchestrator
//!
//! Decides, for one fetch request, whether to serve from cache, call upstream, or
//! refuse. The decision runs through fixed stages:
//!
//! ```text
//! TargetPolicy -> BudgetCheck -> Cooldown -> CacheLookup -> NetworkGate -> SingleFlight -> Persist
//!                     |             |            |              |
//!                  blocked       blocked      cached       no data yet
//! ```
//!
//! - A forced refresh that exceeds its budget is refused before anything else
//!   happens. For ordinary requests an exhausted budget only matters once the
//!   request would actually go upstream, so cache hits are still served.
//! - Budget blocks, cooldown blocks and network-gate misses are not attempts and
//!   leave no audit row.
//! - Upstream work runs inside the single-flight coordinator and persists its own
//!   result there, so concurrent identical requests produce one executor call and
//!   one attempt row.
//! - Every expected outcome is a [`FetchOutcome`] variant; `Err` is reserved for
//!   store and runtime faults.

use crate::budget::{
    BudgetDecision, BudgetLedger, BudgetScope, BudgetSnapshot, CooldownGate, CooldownState,
};
use crate::cache::{AnyPayload, CacheStore, CacheTier, PayloadRequirement};
use crate::classification::{
    ClassifiedFailure, FailureClassifier, FailureKind, StandardFailureClassifier,
};
use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::executor::{ExecutorRequest, FetchExecutor, UpstreamFailure};
use crate::fingerprint::{RequestFingerprint, RequestFingerprinter};
use crate::identity::{IdentityResolver, LinkedIdentity};
use crate::logging::{log_error, log_fetch_decision};
use crate::metrics::{RelayMetrics, RelayMetricsSnapshot};
use crate::models::{CacheEntry, SessionArtifacts};
use crate::persistence::{FetchContext, PersistenceWriter};
use crate::single_flight::SingleFlightCoordinator;
use crate::status::StatusService;
use crate::store::{CacheKey, FetchStore};
use crate::targets::{FetchTarget, TargetPolicy};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One fetch request from a caller
#[derive(Debug, Clone)]
pub struct FetchCommand {
    pub account_id: String,
    pub identity: LinkedIdentity,
    pub targets: Vec<FetchTarget>,
    pub year_limit: i32,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub subject_type: String,
    /// Skip every cache tier and go upstream (subject to budget and cooldown)
    pub force_refresh: bool,
    /// `false` for read-only callers that must never trigger an upstream call
    pub allow_network: bool,
    /// Completeness predicate every cache candidate must satisfy
    pub requirement: Arc<dyn PayloadRequirement>,
}

impl FetchCommand {
    pub fn new(
        account_id: impl Into<String>,
        identity: LinkedIdentity,
        targets: impl IntoIterator<Item = FetchTarget>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            identity,
            targets: targets.into_iter().collect(),
            year_limit: 0,
            from_date: None,
            to_date: None,
            subject_type: "self".to_string(),
            force_refresh: false,
            allow_network: true,
            requirement: Arc::new(AnyPayload),
        }
    }

    pub fn with_year_limit(mut self, year_limit: i32) -> Self {
        self.year_limit = year_limit;
        self
    }

    pub fn with_window(mut self, from_date: Option<NaiveDate>, to_date: Option<NaiveDate>) -> Self {
        self.from_date = from_date;
        self.to_date = to_date;
        self
    }

    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Serve from cache only
    pub fn cache_only(mut self) -> Self {
        self.allow_network = false;
        self
    }

    pub fn with_requirement(mut self, requirement: impl PayloadRequirement + 'static) -> Self {
        self.requirement = Arc::new(requirement);
        self
    }
}

/// Why a cache miss did not go upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MissReason {
    NetworkDisallowed,
    NoSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FetchOutcome {
    /// Served from a cache tier without touching the budget
    Cached { tier: CacheTier, entry: CacheEntry },
    /// Fresh upstream payload, now stored
    Fetched { entry: CacheEntry, coalesced: bool },
    #[serde(rename_all = "camelCase")]
    BudgetExceeded {
        scope: BudgetScope,
        retry_after_sec: u64,
    },
    #[serde(rename_all = "camelCase")]
    CooldownActive {
        retry_after_sec: u64,
        cooldown: CooldownState,
    },
    /// Benign miss; nothing cached and nothing fetched
    NoCacheNoNetwork { reason: MissReason },
    UpstreamFailure { failure: ClassifiedFailure },
    /// The provider session must be re-established by the login flow
    SessionExpired { failure: ClassifiedFailure },
    Timeout { failure: ClassifiedFailure },
    /// Every requested target was removed by the target policy
    NoTargets,
}

impl FetchOutcome {
    /// Stored or fetched payload, if any
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            FetchOutcome::Cached { entry, .. } | FetchOutcome::Fetched { entry, .. } => {
                Some(&entry.payload)
            }
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.payload().is_some()
    }

    pub fn failure(&self) -> Option<&ClassifiedFailure> {
        match self {
            FetchOutcome::UpstreamFailure { failure }
            | FetchOutcome::SessionExpired { failure }
            | FetchOutcome::Timeout { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn retry_after_sec(&self) -> Option<u64> {
        match self {
            FetchOutcome::BudgetExceeded {
                retry_after_sec, ..
            }
            | FetchOutcome::CooldownActive {
                retry_after_sec, ..
            } => Some(*retry_after_sec),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Cached { .. } => "cached",
            FetchOutcome::Fetched { .. } => "fetched",
            FetchOutcome::BudgetExceeded { .. } => "budget_exceeded",
            FetchOutcome::CooldownActive { .. } => "cooldown_active",
            FetchOutcome::NoCacheNoNetwork { .. } => "no_cache_no_network",
            FetchOutcome::UpstreamFailure { .. } => "upstream_failure",
            FetchOutcome::SessionExpired { .. } => "session_expired",
            FetchOutcome::Timeout { .. } => "timeout",
            FetchOutcome::NoTargets => "no_targets",
        }
    }
}

/// Outcome plus the request metadata callers need for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub outcome: FetchOutcome,
    /// `None` only when no targets survived the policy
    pub fingerprint: Option<RequestFingerprint>,
    pub stripped_targets: Vec<FetchTarget>,
    pub budget: Option<BudgetSnapshot>,
}

/// Shared result of one upstream execution
#[derive(Debug, Clone, PartialEq)]
enum UpstreamResult {
    Fetched(CacheEntry),
    Failed(ClassifiedFailure),
}

#[derive(Debug)]
struct OrchestratorInner {
    config: RelayConfig,
    store: Arc<dyn FetchStore>,
    executor: Arc<dyn FetchExecutor>,
    classifier: Arc<dyn FailureClassifier>,
    resolver: IdentityResolver,
    fingerprinter: RequestFingerprinter,
    policy: TargetPolicy,
    ledger: BudgetLedger,
    cooldown: CooldownGate,
    cache: CacheStore,
    writer: PersistenceWriter,
    flights: SingleFlightCoordinator<UpstreamResult>,
    metrics: Arc<RelayMetrics>,
}

/// Cheap to clone; clones share the in-flight table and metrics
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl FetchOrchestrator {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn FetchStore>,
        executor: Arc<dyn FetchExecutor>,
    ) -> RelayResult<Self> {
        Self::with_classifier(config, store, executor, Arc::new(StandardFailureClassifier::new()))
    }

    pub fn with_classifier(
        config: RelayConfig,
        store: Arc<dyn FetchStore>,
        executor: Arc<dyn FetchExecutor>,
        classifier: Arc<dyn FailureClassifier>,
    ) -> RelayResult<Self> {
        config.validate()?;

        let cache = CacheStore::new(Arc::clone(&store), config.cache.clone());
        let inner = OrchestratorInner {
            resolver: IdentityResolver::new(),
            fingerprinter: RequestFingerprinter::new(config.fingerprint.clone()),
            policy: TargetPolicy::new(&config.targets),
            ledger: BudgetLedger::new(Arc::clone(&store), config.budget.clone()),
            cooldown: CooldownGate::new(Arc::clone(&store), config.cooldown.clone()),
            writer: PersistenceWriter::new(
                Arc::clone(&store),
                cache.clone(),
                config.provider.name.clone(),
            ),
            cache,
            flights: SingleFlightCoordinator::new(),
            metrics: Arc::new(RelayMetrics::new()),
            config,
            store,
            executor,
            classifier,
        };

        info!(
            provider = %inner.config.provider.name,
            classifier = inner.classifier.classifier_name(),
            fresh_limit = inner.config.budget.fresh_limit,
            force_refresh_limit = inner.config.budget.force_refresh_limit,
            "🚀 Fetch orchestrator ready"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> RelayMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Upstream executions currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Status reader over the same store and configuration
    pub fn status_service(&self) -> StatusService {
        StatusService::new(self.inner.config.clone(), Arc::clone(&self.inner.store))
    }

    pub async fn fetch(&self, command: FetchCommand) -> RelayResult<FetchResponse> {
        let inner = &self.inner;
        let now = Utc::now();

        let selection = inner.policy.apply(&command.targets);
        if selection.is_empty() {
            debug!(
                account_id = %command.account_id,
                stripped = ?selection.stripped,
                "No fetchable targets after policy"
            );
            log_fetch_decision(&command.account_id, "-", "no_targets", None, None);
            return Ok(FetchResponse {
                outcome: FetchOutcome::NoTargets,
                fingerprint: None,
                stripped_targets: selection.stripped,
                budget: None,
            });
        }

        let identity_hash = inner.resolver.resolve(&command.account_id, &command.identity);
        let fingerprint = inner.fingerprinter.fingerprint(
            &selection.allowed,
            command.year_limit,
            command.from_date,
            command.to_date,
            &command.subject_type,
        );
        let key = CacheKey::new(
            command.account_id.clone(),
            identity_hash.clone(),
            fingerprint.request_hash.clone(),
        );

        let respond = |outcome: FetchOutcome, budget: BudgetSnapshot| {
            log_fetch_decision(
                &command.account_id,
                &fingerprint.request_key,
                outcome.label(),
                match &outcome {
                    FetchOutcome::Cached { tier, .. } => Some(tier.as_str()),
                    _ => None,
                },
                outcome.failure().map(|failure| failure.code.as_str()),
            );
            FetchResponse {
                outcome,
                fingerprint: Some(fingerprint.clone()),
                stripped_targets: selection.stripped.clone(),
                budget: Some(budget),
            }
        };

        // BudgetCheck
        let decision = inner
            .ledger
            .evaluate(&command.account_id, command.force_refresh, now)
            .await?;
        let budget = decision.snapshot();
        let deferred_block = match decision {
            BudgetDecision::Allowed { .. } => None,
            BudgetDecision::Blocked {
                scope,
                retry_after_sec,
                ..
            } => {
                if command.force_refresh {
                    inner.metrics.record_budget_block(scope);
                    return Ok(respond(
                        FetchOutcome::BudgetExceeded {
                            scope,
                            retry_after_sec,
                        },
                        budget,
                    ));
                }
                Some((scope, retry_after_sec))
            }
        };

        // Cooldown
        if command.force_refresh {
            let cooldown = inner.cooldown.state(&command.account_id, now).await?;
            if !cooldown.available {
                inner.metrics.record_cooldown_block();
                return Ok(respond(
                    FetchOutcome::CooldownActive {
                        retry_after_sec: cooldown.remaining_seconds.max(1),
                        cooldown,
                    },
                    budget,
                ));
            }
        }

        let context = FetchContext {
            account_id: command.account_id.clone(),
            identity_hash,
            fingerprint: fingerprint.clone(),
            force_refresh: command.force_refresh,
        };

        // CacheLookup
        if !command.force_refresh {
            if let Some(hit) = inner
                .cache
                .lookup(&key, command.requirement.as_ref(), now)
                .await?
            {
                inner.metrics.record_cache_hit(hit.tier);
                inner.writer.record_cache_hit(&context, &hit, now).await?;
                return Ok(respond(
                    FetchOutcome::Cached {
                        tier: hit.tier,
                        entry: hit.entry,
                    },
                    budget,
                ));
            }
            inner.metrics.record_cache_miss();
        }

        // NetworkGate
        if !command.allow_network {
            return Ok(respond(
                FetchOutcome::NoCacheNoNetwork {
                    reason: MissReason::NetworkDisallowed,
                },
                budget,
            ));
        }
        let link = inner
            .store
            .find_provider_link(&command.account_id, &inner.config.provider.name)
            .await?;
        let Some(session) = link.and_then(|link| link.session_artifacts()) else {
            return Ok(respond(
                FetchOutcome::NoCacheNoNetwork {
                    reason: MissReason::NoSession,
                },
                budget,
            ));
        };
        if let Some((scope, retry_after_sec)) = deferred_block {
            inner.metrics.record_budget_block(scope);
            return Ok(respond(
                FetchOutcome::BudgetExceeded {
                    scope,
                    retry_after_sec,
                },
                budget,
            ));
        }

        // SingleFlightExecute + Persist
        let request = ExecutorRequest::from_fingerprint(
            inner.config.provider.name.clone(),
            &fingerprint,
            command.identity.login_org.clone(),
        );
        let flight = inner
            .flights
            .run(&key.flight_key(), || self.upstream_flight(context, request, session))
            .await;
        if !flight.leader {
            inner.metrics.record_coalesced_waiter();
        }

        let outcome = match flight.value? {
            UpstreamResult::Fetched(entry) => FetchOutcome::Fetched {
                entry,
                coalesced: !flight.leader,
            },
            UpstreamResult::Failed(failure) => match failure.kind {
                FailureKind::SessionExpired => FetchOutcome::SessionExpired { failure },
                FailureKind::Timeout => FetchOutcome::Timeout { failure },
                FailureKind::Upstream => FetchOutcome::UpstreamFailure { failure },
            },
        };

        // the attempt just written changes the counters
        let budget = inner
            .ledger
            .snapshot(&command.account_id, Utc::now())
            .await?;
        Ok(respond(outcome, budget))
    }

    /// The shared upstream execution: call, classify, persist
    fn upstream_flight(
        &self,
        context: FetchContext,
        request: ExecutorRequest,
        session: SessionArtifacts,
    ) -> impl std::future::Future<Output = RelayResult<UpstreamResult>> + Send + 'static {
        let executor = Arc::clone(&self.inner.executor);
        let classifier = Arc::clone(&self.inner.classifier);
        let writer = self.inner.writer.clone();
        let metrics = Arc::clone(&self.inner.metrics);
        let timeout = self.inner.config.executor.timeout();

        async move {
            metrics.record_upstream_call();
            debug!(
                account_id = %context.account_id,
                request_key = %context.fingerprint.request_key,
                "Calling upstream executor"
            );

            let result = call_executor(executor, request, session, timeout).await;
            let finished_at = Utc::now();

            match result {
                Ok(payload) => {
                    let entry = writer
                        .commit_success(&context, payload, finished_at)
                        .await
                        .inspect_err(|e| {
                            log_error(
                                "orchestrator",
                                "commit_success",
                                &e.to_string(),
                                Some(&context.fingerprint.request_key),
                            )
                        })?;
                    metrics.record_upstream_success();
                    Ok(UpstreamResult::Fetched(entry))
                }
                Err(raw) => {
                    let failure = classifier.classify(&raw);
                    warn!(
                        account_id = %context.account_id,
                        request_key = %context.fingerprint.request_key,
                        kind = %failure.kind,
                        code = %failure.code,
                        "Upstream fetch failed"
                    );
                    writer
                        .commit_failure(&context, &failure, finished_at)
                        .await
                        .inspect_err(|e| {
                            log_error(
                                "orchestrator",
                                "commit_failure",
                                &e.to_string(),
                                Some(&context.fingerprint.request_key),
                            )
                        })?;
                    metrics.record_failure(failure.kind);
                    Ok(UpstreamResult::Failed(failure))
                }
            }
        }
    }
}

/// Run the executor on its own task under the overall deadline
async fn call_executor(
    executor: Arc<dyn FetchExecutor>,
    request: ExecutorRequest,
    session: SessionArtifacts,
    timeout: Duration,
) -> Result<serde_json::Value, UpstreamFailure> {
    let call = tokio::spawn(async move { executor.execute(&request, &session).await });
    let abort = call.abort_handle();

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(UpstreamFailure::panicked(format!(
            "executor task failed: {join_error}"
        ))),
        Err(_) => {
            abort.abort();
            Err(UpstreamFailure::timeout(timeout))
        }
    }
}
