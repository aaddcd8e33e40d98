use chrono::NaiveDate;
use checkup_relay::targets::FetchTarget;
use proptest::prelude::*;

/// Any single target
pub fn target_strategy() -> impl Strategy<Value = FetchTarget> {
    prop::sample::select(FetchTarget::ALL.to_vec())
}

/// Non-empty target lists, duplicates allowed
pub fn target_list_strategy() -> impl Strategy<Value = Vec<FetchTarget>> {
    prop::collection::vec(target_strategy(), 1..8)
}

/// Summary-only target lists
pub fn summary_targets_strategy() -> impl Strategy<Value = Vec<FetchTarget>> {
    prop::collection::vec(Just(FetchTarget::CheckupOverview), 1..4)
}

pub fn optional_date_strategy() -> impl Strategy<Value = Option<NaiveDate>> {
    prop::option::of((2000i32..2030, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
    }))
}

pub fn subject_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("self".to_string()), Just("child".to_string()), "[a-z]{1,8}"]
}

pub fn year_limit_strategy() -> impl Strategy<Value = i32> {
    -5i32..100
}
