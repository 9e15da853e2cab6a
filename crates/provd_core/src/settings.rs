//! Settings maps and context extraction.

use std::collections::BTreeSet;

/// An ordered key/value map of settings.
pub type Settings = std::collections::BTreeMap<String, String>;

/// Returns the context a key belongs to below `sub_root`.
///
/// The context is the first path segment following `sub_root`, so with a
/// sub-root of `/telephony/contexts/` the key
/// `/telephony/contexts/op1/apn` belongs to `op1`. Keys outside the
/// sub-root, and the sub-root itself, have no context.
pub fn context_of<'a>(key: &'a str, sub_root: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(sub_root)?;
    let context = rest.split('/').next().unwrap_or(rest);
    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

/// Collects the distinct contexts present in `settings` below `sub_root`.
pub fn contexts<'a>(settings: &'a Settings, sub_root: &str) -> BTreeSet<&'a str> {
    settings
        .keys()
        .filter_map(|key| context_of(key, sub_root))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn context_is_first_segment() {
        let root = "/applications/email/";
        assert_eq!(context_of("/applications/email/work/name", root), Some("work"));
        assert_eq!(
            context_of("/applications/email/work/incoming/host", root),
            Some("work")
        );
        assert_eq!(context_of("/applications/email/solo", root), Some("solo"));
        assert_eq!(context_of("/applications/email/", root), None);
        assert_eq!(context_of("/telephony/mms/apn", root), None);
    }

    #[test]
    fn contexts_are_deduplicated() {
        let s = settings(&[
            ("/r/a/x", "1"),
            ("/r/a/y", "2"),
            ("/r/b/y", "3"),
            ("/other/c", "4"),
        ]);
        let found: Vec<_> = contexts(&s, "/r/").into_iter().collect();
        assert_eq!(found, vec!["a", "b"]);
    }
}
