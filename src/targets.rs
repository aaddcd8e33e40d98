//! # Fetch Targets
//!
//! The datasets a caller can ask the provider for, their cost class, and the
//! policy that strips disabled high-cost targets before a request is fingerprinted.

use crate::config::{CacheTtlConfig, TargetPolicyConfig};
use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One dataset the upstream provider can return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchTarget {
    /// Checkup summary list; cheap, refreshed often
    CheckupOverview,
    /// Per-item checkup results
    CheckupResult,
    /// Year-by-year checkup history
    CheckupYearly,
    /// Hospital treatment history
    TreatmentHistory,
    /// Prescription and dispensing history
    MedicationHistory,
}

/// Cost class of a target, used for year-limit canonicalization and TTLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetClass {
    Summary,
    Detail,
    HighCost,
}

impl FetchTarget {
    pub const ALL: [FetchTarget; 5] = [
        FetchTarget::CheckupOverview,
        FetchTarget::CheckupResult,
        FetchTarget::CheckupYearly,
        FetchTarget::TreatmentHistory,
        FetchTarget::MedicationHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchTarget::CheckupOverview => "checkupOverview",
            FetchTarget::CheckupResult => "checkupResult",
            FetchTarget::CheckupYearly => "checkupYearly",
            FetchTarget::TreatmentHistory => "treatmentHistory",
            FetchTarget::MedicationHistory => "medicationHistory",
        }
    }

    pub fn class(&self) -> TargetClass {
        match self {
            FetchTarget::CheckupOverview => TargetClass::Summary,
            FetchTarget::CheckupResult | FetchTarget::CheckupYearly => TargetClass::Detail,
            FetchTarget::TreatmentHistory | FetchTarget::MedicationHistory => {
                TargetClass::HighCost
            }
        }
    }

    /// Detail targets honour a caller-supplied year limit; summary targets do not
    pub fn is_detail(&self) -> bool {
        !matches!(self.class(), TargetClass::Summary)
    }

    pub fn is_high_cost(&self) -> bool {
        matches!(self.class(), TargetClass::HighCost)
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchTarget {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        FetchTarget::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| RelayError::InvalidInput(format!("Unknown fetch target: {trimmed}")))
    }
}

/// Parse a list of raw target names, rejecting unknown ones
pub fn parse_targets<I, S>(raw: I) -> Result<Vec<FetchTarget>, RelayError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|s| s.as_ref().parse()).collect()
}

/// Validity period for an entry holding `targets`: the shortest TTL among their classes
pub fn ttl_for(targets: &[FetchTarget], ttl: &CacheTtlConfig) -> chrono::Duration {
    let seconds = targets
        .iter()
        .map(|t| match t.class() {
            TargetClass::Summary => ttl.summary_ttl_seconds,
            TargetClass::Detail => ttl.detail_ttl_seconds,
            TargetClass::HighCost => ttl.high_cost_ttl_seconds,
        })
        .min()
        .unwrap_or(ttl.summary_ttl_seconds);
    chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1_000))
}

/// Targets left after policy, and the ones removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelection {
    pub allowed: Vec<FetchTarget>,
    pub stripped: Vec<FetchTarget>,
}

impl TargetSelection {
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Removes disabled target classes from incoming requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPolicy {
    high_cost_enabled: bool,
}

impl TargetPolicy {
    pub fn new(config: &TargetPolicyConfig) -> Self {
        Self {
            high_cost_enabled: config.high_cost_enabled,
        }
    }

    pub fn high_cost_enabled(&self) -> bool {
        self.high_cost_enabled
    }

    pub fn is_allowed(&self, target: FetchTarget) -> bool {
        self.high_cost_enabled || !target.is_high_cost()
    }

    /// Every target a caller may currently request, in canonical order
    pub fn allowed_targets(&self) -> Vec<FetchTarget> {
        FetchTarget::ALL
            .into_iter()
            .filter(|t| self.is_allowed(*t))
            .collect()
    }

    /// Split `requested` into allowed and stripped targets.
    ///
    /// Both halves are deduplicated; the allowed half keeps request order so the
    /// fingerprinter stays the single place that canonicalizes.
    pub fn apply(&self, requested: &[FetchTarget]) -> TargetSelection {
        let mut seen = BTreeSet::new();
        let mut allowed = Vec::new();
        let mut stripped = BTreeSet::new();
        for target in requested {
            if !seen.insert(*target) {
                continue;
            }
            if self.is_allowed(*target) {
                allowed.push(*target);
            } else {
                stripped.insert(*target);
            }
        }
        TargetSelection {
            allowed,
            stripped: stripped.into_iter().collect(),
        }
    }
}
