//! # Relay Metrics
//!
//! Process-local counters for fetch decisions. Cheap to bump from any task; read
//! through [`RelayMetrics::snapshot`].

use crate::budget::BudgetScope;
use crate::cache::CacheTier;
use crate::classification::FailureKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    valid_hits: AtomicU64,
    history_hits: AtomicU64,
    global_history_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_calls: AtomicU64,
    upstream_successes: AtomicU64,
    coalesced_waiters: AtomicU64,
    fresh_budget_blocks: AtomicU64,
    force_refresh_budget_blocks: AtomicU64,
    cooldown_blocks: AtomicU64,
    upstream_failures: AtomicU64,
    session_expirations: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetricsSnapshot {
    pub valid_hits: u64,
    pub history_hits: u64,
    pub global_history_hits: u64,
    pub cache_misses: u64,
    pub upstream_calls: u64,
    pub upstream_successes: u64,
    pub coalesced_waiters: u64,
    pub fresh_budget_blocks: u64,
    pub force_refresh_budget_blocks: u64,
    pub cooldown_blocks: u64,
    pub upstream_failures: u64,
    pub session_expirations: u64,
    pub timeouts: u64,
}

impl RelayMetricsSnapshot {
    pub fn cache_hits(&self) -> u64 {
        self.valid_hits + self.history_hits + self.global_history_hits
    }

    /// Share of cache lookups that were served from any tier
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits() + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits() as f64 / lookups as f64
        }
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Valid => &self.valid_hits,
            CacheTier::History => &self.history_hits,
            CacheTier::GlobalHistory => &self.global_history_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_call(&self) {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_success(&self) {
        self.upstream_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_waiter(&self) {
        self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_budget_block(&self, scope: BudgetScope) {
        let counter = match scope {
            BudgetScope::Fresh => &self.fresh_budget_blocks,
            BudgetScope::ForceRefresh => &self.force_refresh_budget_blocks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooldown_block(&self) {
        self.cooldown_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        match kind {
            FailureKind::SessionExpired => {
                self.session_expirations.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Upstream => {}
        }
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            valid_hits: self.valid_hits.load(Ordering::Relaxed),
            history_hits: self.history_hits.load(Ordering::Relaxed),
            global_history_hits: self.global_history_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            upstream_successes: self.upstream_successes.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            fresh_budget_blocks: self.fresh_budget_blocks.load(Ordering::Relaxed),
            force_refresh_budget_blocks: self.force_refresh_budget_blocks.load(Ordering::Relaxed),
            cooldown_blocks: self.cooldown_blocks.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            session_expirations: self.session_expirations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
