mod common;

use checkup_relay::config::FingerprintConfig;
use checkup_relay::fingerprint::RequestFingerprinter;
use checkup_relay::identity::{IdentityResolver, LinkedIdentity};
use common::strategies::*;
use proptest::prelude::*;

fn fingerprinter() -> RequestFingerprinter {
    RequestFingerprinter::new(FingerprintConfig::default())
}

proptest! {
    /// Property: target order and duplicates never change the request hash
    #[test]
    fn fingerprint_ignores_target_order_and_duplicates(
        targets in target_list_strategy(),
        year_limit in year_limit_strategy(),
        from in optional_date_strategy(),
        to in optional_date_strategy(),
        subject in subject_strategy(),
    ) {
        let fp = fingerprinter();
        let original = fp.fingerprint(&targets, year_limit, from, to, &subject);

        let mut shuffled = targets.clone();
        shuffled.reverse();
        shuffled.extend(targets.iter().copied());
        let reordered = fp.fingerprint(&shuffled, year_limit, from, to, &subject);

        prop_assert_eq!(&original.request_hash, &reordered.request_hash);
        prop_assert_eq!(&original.request_key, &reordered.request_key);
    }

    /// Property: summary-only requests pin the year limit to the default
    #[test]
    fn summary_requests_ignore_year_limit(
        targets in summary_targets_strategy(),
        year_limit in year_limit_strategy(),
    ) {
        let fp = fingerprinter();
        let requested = fp.fingerprint(&targets, year_limit, None, None, "self");
        let defaulted = fp.fingerprint(&targets, 2, None, None, "self");
        prop_assert_eq!(requested.year_limit, 2);
        prop_assert_eq!(requested.request_hash, defaulted.request_hash);
    }

    /// Property: canonical year limits always fall inside the configured bounds
    #[test]
    fn year_limit_stays_within_bounds(
        targets in target_list_strategy(),
        year_limit in year_limit_strategy(),
    ) {
        let fp = fingerprinter().fingerprint(&targets, year_limit, None, None, "self");
        prop_assert!((2..=10).contains(&fp.year_limit));
        if !fp.has_detail_target() {
            prop_assert_eq!(fp.year_limit, 2);
        }
    }

    /// Property: cosmetic differences in identity fields hash identically
    #[test]
    fn identity_hash_ignores_case_and_spacing(
        name in "[A-Za-z]{2,12}",
        digits in "[0-9]{8}",
    ) {
        let resolver = IdentityResolver::new();
        let plain = LinkedIdentity::new(name.clone(), digits.clone(), "01012345678", "kakao");
        let noisy = LinkedIdentity::new(
            format!("  {} ", name.to_uppercase()),
            format!("{}-{}", &digits[..4], &digits[4..]),
            "010-1234-5678",
            " KAKAO ",
        );
        prop_assert_eq!(resolver.resolve("acct-1", &plain), resolver.resolve("acct-2", &noisy));
    }
}
