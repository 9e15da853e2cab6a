//! Property-based test generators using proptest.

use provd_core::Settings;
use proptest::prelude::*;

/// Strategy for generating valid keys below `root`.
pub fn key_strategy(root: &'static str) -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}(/[a-z][a-z0-9]{0,7}){0,2}")
        .expect("Invalid regex")
        .prop_map(move |rest| format!("{root}{rest}"))
}

/// Strategy for generating context identifiers.
pub fn context_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating settings grouped in contexts below `sub_root`.
pub fn settings_strategy(sub_root: &'static str) -> impl Strategy<Value = Settings> {
    prop::collection::btree_map(
        (context_strategy(), "(name|apn|username|password)")
            .prop_map(move |(ctx, field)| format!("{sub_root}{ctx}/{field}")),
        prop::string::string_regex("[ -~]{0,16}").expect("Invalid regex"),
        0..12,
    )
}
