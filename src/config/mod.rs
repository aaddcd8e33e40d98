//! # Relay Configuration
//!
//! A single immutable [`RelayConfig`] is built once at startup and handed to every
//! component explicitly. Nothing below reads the environment at call sites.
//!
//! ## Sources
//!
//! - Built-in defaults (every field has one)
//! - Optional TOML file
//! - Environment variables prefixed with `CHECKUP_RELAY_`, sections separated by `__`
//!
//! ```rust,no_run
//! use checkup_relay::config::RelayConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // CHECKUP_RELAY_BUDGET__FRESH_LIMIT=10 overrides budget.fresh_limit
//! let config = RelayConfig::load(None)?;
//! assert!(config.budget.fresh_limit > 0);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ENV_PREFIX;

/// Root configuration for the fetch resilience layer
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream provider identification
    pub provider: ProviderConfig,

    /// Sliding-window fetch budget per acting account
    pub budget: BudgetConfig,

    /// Request canonicalization settings
    pub fingerprint: FingerprintConfig,

    /// Force-refresh cooldown
    pub cooldown: CooldownConfig,

    /// Cache validity per target class
    pub cache: CacheTtlConfig,

    /// Which target classes may be requested
    pub targets: TargetPolicyConfig,

    /// Upstream call limits
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "nhis".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub window_hours: u32,
    /// Non-cached attempts allowed per window
    pub fresh_limit: u32,
    /// Forced refreshes allowed per window (a subset of fresh attempts)
    pub force_refresh_limit: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            fresh_limit: 6,
            force_refresh_limit: 2,
        }
    }
}

impl BudgetConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub default_year_limit: i32,
    pub max_year_limit: i32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            default_year_limit: 2,
            max_year_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub force_refresh_seconds: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            force_refresh_seconds: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub summary_ttl_seconds: u64,
    pub detail_ttl_seconds: u64,
    pub high_cost_ttl_seconds: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            summary_ttl_seconds: 6 * 60 * 60,
            detail_ttl_seconds: 24 * 60 * 60,
            high_cost_ttl_seconds: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetPolicyConfig {
    /// Gate for targets that are expensive upstream. Off unless explicitly enabled.
    pub high_cost_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Overall deadline for one upstream fetch, covering every round trip
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Longest accepted budget window (one year)
pub const MAX_WINDOW_HOURS: u32 = 24 * 365;

/// Longest accepted cache TTL or cooldown (ten years)
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

impl RelayConfig {
    /// Reject configurations that would make the relay misbehave silently
    pub fn validate(&self) -> ConfigResult<()> {
        if self.provider.name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "provider.name",
                &self.provider.name,
                "must not be empty",
            ));
        }
        if self.budget.window_hours == 0 {
            return Err(ConfigurationError::invalid_value(
                "budget.window_hours",
                "0",
                "must be positive",
            ));
        }
        if self.budget.window_hours > MAX_WINDOW_HOURS {
            return Err(ConfigurationError::invalid_value(
                "budget.window_hours",
                self.budget.window_hours.to_string(),
                format!("must be at most {MAX_WINDOW_HOURS}"),
            ));
        }
        if self.budget.fresh_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "budget.fresh_limit",
                "0",
                "must be positive",
            ));
        }
        if self.fingerprint.default_year_limit <= 0 {
            return Err(ConfigurationError::invalid_value(
                "fingerprint.default_year_limit",
                self.fingerprint.default_year_limit.to_string(),
                "must be positive",
            ));
        }
        if self.fingerprint.default_year_limit > self.fingerprint.max_year_limit {
            return Err(ConfigurationError::invalid_value(
                "fingerprint.max_year_limit",
                self.fingerprint.max_year_limit.to_string(),
                format!(
                    "must be at least default_year_limit ({})",
                    self.fingerprint.default_year_limit
                ),
            ));
        }
        let durations = [
            ("cache.summary_ttl_seconds", self.cache.summary_ttl_seconds),
            ("cache.detail_ttl_seconds", self.cache.detail_ttl_seconds),
            ("cache.high_cost_ttl_seconds", self.cache.high_cost_ttl_seconds),
            ("cooldown.force_refresh_seconds", self.cooldown.force_refresh_seconds),
        ];
        for (field, seconds) in durations {
            if seconds > MAX_DURATION_SECONDS {
                return Err(ConfigurationError::invalid_value(
                    field,
                    seconds.to_string(),
                    format!("must be at most {MAX_DURATION_SECONDS} seconds"),
                ));
            }
        }
        if self.executor.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.timeout_ms",
                "0",
                "must be positive",
            ));
        }
        Ok(())
    }
}
