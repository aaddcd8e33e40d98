//! # Budget Ledger
//!
//! Sliding-window admission control for upstream fetches, per acting account.
//!
//! Two counters are derived from the attempt log on every evaluation:
//!
//! - **fresh**: every non-cached attempt in the window
//! - **force refresh**: the subset of those requested with `force_refresh`
//!
//! Evaluation and recording are separate calls (evaluate, act, record), so no lock
//! is held while the upstream call runs. Cached attempts are written for audit but
//! never counted.

use crate::config::{BudgetConfig, CooldownConfig};
use crate::error::RelayResult;
use crate::models::{AttemptWindow, FetchAttempt, NewFetchAttempt};
use crate::store::FetchStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Retry hint used when a counter blocks but no attempt explains it
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Which quota rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BudgetScope {
    Fresh,
    ForceRefresh,
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetScope::Fresh => write!(f, "fresh"),
            BudgetScope::ForceRefresh => write!(f, "forceRefresh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

impl CounterSnapshot {
    fn new(used: i64, limit: u32) -> Self {
        let used = u32::try_from(used.max(0)).unwrap_or(u32::MAX);
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Client-visible budget status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub window_hours: u32,
    pub fresh: CounterSnapshot,
    pub force_refresh: CounterSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum BudgetDecision {
    Allowed {
        snapshot: BudgetSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Blocked {
        scope: BudgetScope,
        retry_after_sec: u64,
        snapshot: BudgetSnapshot,
    },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed { .. })
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        match self {
            BudgetDecision::Allowed { snapshot } | BudgetDecision::Blocked { snapshot, .. } => {
                *snapshot
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetLedger {
    store: Arc<dyn FetchStore>,
    config: BudgetConfig,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn FetchStore>, config: BudgetConfig) -> Self {
        Self { store, config }
    }

    pub fn window(&self) -> Duration {
        self.config.window()
    }

    /// Current counters without a decision
    pub async fn snapshot(&self, account_id: &str, now: DateTime<Utc>) -> RelayResult<BudgetSnapshot> {
        let since = now - self.window();
        let fresh_used = self
            .store
            .count_attempts(&AttemptWindow::fresh(account_id, since))
            .await?;
        let forced_used = self
            .store
            .count_attempts(&AttemptWindow::forced(account_id, Some(since)))
            .await?;

        Ok(BudgetSnapshot {
            window_hours: self.config.window_hours,
            fresh: CounterSnapshot::new(fresh_used, self.config.fresh_limit),
            force_refresh: CounterSnapshot::new(forced_used, self.config.force_refresh_limit),
        })
    }

    /// Decide whether `account_id` may start another upstream fetch
    pub async fn evaluate(
        &self,
        account_id: &str,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> RelayResult<BudgetDecision> {
        let snapshot = self.snapshot(account_id, now).await?;
        let since = now - self.window();

        let blocked_scope = if snapshot.fresh.is_exhausted() {
            Some((BudgetScope::Fresh, AttemptWindow::fresh(account_id, since)))
        } else if force_refresh && snapshot.force_refresh.is_exhausted() {
            Some((
                BudgetScope::ForceRefresh,
                AttemptWindow::forced(account_id, Some(since)),
            ))
        } else {
            None
        };

        let Some((scope, window)) = blocked_scope else {
            return Ok(BudgetDecision::Allowed { snapshot });
        };

        let earliest = self.store.earliest_attempt_at(&window).await?;
        let retry_after_sec = retry_after_secs(earliest, self.window(), now);
        debug!(
            account_id = %account_id,
            scope = %scope,
            retry_after_sec,
            fresh_used = snapshot.fresh.used,
            force_refresh_used = snapshot.force_refresh.used,
            "Fetch budget exhausted"
        );

        Ok(BudgetDecision::Blocked {
            scope,
            retry_after_sec,
            snapshot,
        })
    }

    /// Append an attempt row
    pub async fn record_attempt(&self, attempt: NewFetchAttempt) -> RelayResult<FetchAttempt> {
        self.store.insert_attempt(attempt).await
    }
}

/// Seconds until the earliest counted attempt leaves the window, rounded up and at least one.
pub fn retry_after_secs(
    earliest: Option<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> u64 {
    match earliest {
        Some(earliest) => {
            let remaining_ms = (earliest + window - now).num_milliseconds();
            let remaining = (remaining_ms + 999).div_euclid(1_000);
            u64::try_from(remaining.max(1)).unwrap_or(1)
        }
        None => DEFAULT_RETRY_AFTER_SECS,
    }
}

/// Force-refresh cooldown status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownState {
    pub available: bool,
    pub remaining_seconds: u64,
    pub available_at: Option<DateTime<Utc>>,
}

/// Cooldown after the last forced attempt; remaining time rounds up to whole seconds
pub fn compute_cooldown_state(
    cooldown_seconds: u64,
    last_forced_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> CooldownState {
    let Some(last) = last_forced_attempt_at else {
        return CooldownState {
            available: true,
            remaining_seconds: 0,
            available_at: None,
        };
    };

    let cooldown = Duration::seconds(i64::try_from(cooldown_seconds).unwrap_or(i64::MAX / 1_000));
    let available_at = last + cooldown;
    let remaining_ms = (available_at - now).num_milliseconds();
    if remaining_ms <= 0 {
        return CooldownState {
            available: true,
            remaining_seconds: 0,
            available_at: Some(available_at),
        };
    }

    let remaining_seconds = u64::try_from((remaining_ms + 999) / 1_000).unwrap_or(u64::MAX);
    CooldownState {
        available: false,
        remaining_seconds,
        available_at: Some(available_at),
    }
}

/// Reads the last forced attempt from the ledger and applies the cooldown
#[derive(Debug, Clone)]
pub struct CooldownGate {
    store: Arc<dyn FetchStore>,
    config: CooldownConfig,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn FetchStore>, config: CooldownConfig) -> Self {
        Self { store, config }
    }

    pub async fn state(&self, account_id: &str, now: DateTime<Utc>) -> RelayResult<CooldownState> {
        let last = self
            .store
            .latest_attempt_at(&AttemptWindow::forced(account_id, None))
            .await?;
        Ok(compute_cooldown_state(
            self.config.force_refresh_seconds,
            last,
            now,
        ))
    }
}
