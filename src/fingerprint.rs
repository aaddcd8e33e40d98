//! # Request Fingerprinting
//!
//! Canonicalizes the shape of a fetch request into a digest (`request_hash`) used as
//! the cache and single-flight key, plus a readable `request_key` for logs.
//!
//! Canonical form:
//! - targets deduplicated and sorted by name
//! - year limit clamped to `[default_year_limit, max_year_limit]` when any detail
//!   target is present, otherwise pinned to `default_year_limit`
//! - subject type trimmed and lowercased

use crate::config::FingerprintConfig;
use crate::targets::FetchTarget;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical description of a fetch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFingerprint {
    pub request_hash: String,
    pub request_key: String,
    pub normalized_targets: Vec<FetchTarget>,
    pub year_limit: i32,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub subject_type: String,
}

impl RequestFingerprint {
    pub fn has_detail_target(&self) -> bool {
        self.normalized_targets.iter().any(FetchTarget::is_detail)
    }
}

#[derive(Debug, Clone)]
pub struct RequestFingerprinter {
    config: FingerprintConfig,
}

impl RequestFingerprinter {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn fingerprint(
        &self,
        targets: &[FetchTarget],
        year_limit: i32,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        subject_type: &str,
    ) -> RequestFingerprint {
        let normalized_targets = normalize_targets(targets);
        let year_limit = self.canonical_year_limit(&normalized_targets, year_limit);
        let subject_type = subject_type.trim().to_lowercase();

        let target_names: Vec<&str> = normalized_targets.iter().map(FetchTarget::as_str).collect();
        let from = from_date.map(|d| d.to_string()).unwrap_or_default();
        let to = to_date.map(|d| d.to_string()).unwrap_or_default();

        let canonical = format!(
            "targets={};yearLimit={};from={};to={};subject={}",
            target_names.join(","),
            year_limit,
            from,
            to,
            subject_type
        );
        let request_hash = hex::encode(Sha256::digest(canonical.as_bytes()));

        let request_key = format!(
            "{}|y{}|{}..{}|{}",
            target_names.join("+"),
            year_limit,
            if from.is_empty() { "*" } else { from.as_str() },
            if to.is_empty() { "*" } else { to.as_str() },
            if subject_type.is_empty() {
                "-"
            } else {
                subject_type.as_str()
            }
        );

        RequestFingerprint {
            request_hash,
            request_key,
            normalized_targets,
            year_limit,
            from_date,
            to_date,
            subject_type,
        }
    }

    fn canonical_year_limit(&self, targets: &[FetchTarget], requested: i32) -> i32 {
        let default = self.config.default_year_limit;
        if targets.iter().any(FetchTarget::is_detail) {
            requested.clamp(default, self.config.max_year_limit.max(default))
        } else {
            default
        }
    }
}

fn normalize_targets(targets: &[FetchTarget]) -> Vec<FetchTarget> {
    let mut normalized = targets.to_vec();
    normalized.sort_by_key(|t| t.as_str());
    normalized.dedup();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprinter() -> RequestFingerprinter {
        RequestFingerprinter::new(FingerprintConfig {
            default_year_limit: 2,
            max_year_limit: 10,
        })
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_order_and_duplicates_do_not_matter() {
        let fp = fingerprinter();
        let a = fp.fingerprint(
            &[FetchTarget::CheckupOverview, FetchTarget::CheckupResult],
            3,
            date(2020, 1, 1),
            date(2024, 12, 31),
            "self",
        );
        let b = fp.fingerprint(
            &[
                FetchTarget::CheckupResult,
                FetchTarget::CheckupOverview,
                FetchTarget::CheckupOverview,
            ],
            3,
            date(2020, 1, 1),
            date(2024, 12, 31),
            "self",
        );
        assert_eq!(a.request_hash, b.request_hash);
        assert_eq!(a.request_key, b.request_key);
        assert_eq!(
            a.normalized_targets,
            vec![FetchTarget::CheckupOverview, FetchTarget::CheckupResult]
        );
    }

    #[test]
    fn test_summary_only_year_limit_is_canonicalized() {
        let fp = fingerprinter();
        let requested = fp.fingerprint(&[FetchTarget::CheckupOverview], 5, None, None, "self");
        let default = fp.fingerprint(&[FetchTarget::CheckupOverview], 2, None, None, "self");
        assert_eq!(requested.request_hash, default.request_hash);
        assert_eq!(requested.year_limit, 2);
    }

    #[test]
    fn test_detail_year_limit_is_clamped() {
        let fp = fingerprinter();
        let high = fp.fingerprint(&[FetchTarget::CheckupResult], 999, None, None, "self");
        assert_eq!(high.year_limit, 10);
        let low = fp.fingerprint(&[FetchTarget::CheckupResult], -4, None, None, "self");
        assert_eq!(low.year_limit, 2);
        let within = fp.fingerprint(&[FetchTarget::CheckupResult], 5, None, None, "self");
        assert_eq!(within.year_limit, 5);
        assert_ne!(within.request_hash, high.request_hash);
    }

    #[test]
    fn test_window_and_subject_change_the_hash() {
        let fp = fingerprinter();
        let base = fp.fingerprint(&[FetchTarget::CheckupOverview], 2, None, None, "self");
        let windowed = fp.fingerprint(
            &[FetchTarget::CheckupOverview],
            2,
            date(2023, 1, 1),
            None,
            "self",
        );
        let dependent = fp.fingerprint(&[FetchTarget::CheckupOverview], 2, None, None, "dependent");
        assert_ne!(base.request_hash, windowed.request_hash);
        assert_ne!(base.request_hash, dependent.request_hash);
    }

    #[test]
    fn test_subject_type_is_normalized() {
        let fp = fingerprinter();
        let a = fp.fingerprint(&[FetchTarget::CheckupOverview], 2, None, None, " SELF ");
        let b = fp.fingerprint(&[FetchTarget::CheckupOverview], 2, None, None, "self");
        assert_eq!(a.request_hash, b.request_hash);
    }

    #[test]
    fn test_request_key_is_readable() {
        let fp = fingerprinter();
        let fingerprint = fp.fingerprint(
            &[FetchTarget::CheckupYearly, FetchTarget::CheckupOverview],
            4,
            date(2021, 3, 1),
            None,
            "self",
        );
        assert_eq!(
            fingerprint.request_key,
            "checkupOverview+checkupYearly|y4|2021-03-01..*|self"
        );
        assert!(fingerprint.has_detail_target());
    }
}
