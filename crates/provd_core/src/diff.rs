//! Diff engine.
//!
//! Backends generally cannot apply a settings tree wholesale. At sync-out an
//! adapter compares the snapshot it produced at sync-in with the session's
//! final cache and replays the difference as a sequence of operations.
//!
//! Settings below a *sub-root* are grouped into contexts (one account, one
//! connection context) so that whole objects are added or removed as a
//! unit rather than key by key.

use crate::settings::{context_of, contexts, Settings};
use std::collections::{BTreeMap, BTreeSet};

/// One operation produced by a diff, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp<'a> {
    /// Remove the whole context from the backend.
    RemoveContext(&'a str),
    /// Create a new context in the backend.
    AddContext(&'a str),
    /// Write a value.
    Set(&'a str, &'a str),
    /// Clear a value that disappeared from a surviving object.
    Unset(&'a str),
}

/// Difference between two snapshots of one adapter's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Contexts present in the old snapshot only.
    pub removed: BTreeSet<String>,
    /// Contexts present in the new snapshot only.
    pub added: BTreeSet<String>,
    /// Keys that are new or whose value changed.
    pub set: BTreeMap<String, String>,
    /// Keys that vanished without their whole context vanishing.
    pub unset: BTreeSet<String>,
}

impl Diff {
    /// Computes the difference from `old` to `new`, grouping contexts below
    /// `sub_root`.
    pub fn compute(old: &Settings, new: &Settings, sub_root: &str) -> Self {
        let old_contexts = contexts(old, sub_root);
        let new_contexts = contexts(new, sub_root);

        let removed: BTreeSet<String> = old_contexts
            .difference(&new_contexts)
            .map(|c| c.to_string())
            .collect();
        let added = new_contexts
            .difference(&old_contexts)
            .map(|c| c.to_string())
            .collect();

        let set = new
            .iter()
            .filter(|(key, value)| old.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let unset = old
            .keys()
            .filter(|key| !new.contains_key(*key))
            .filter(|key| match context_of(key, sub_root) {
                Some(context) => !removed.contains(context),
                None => true,
            })
            .cloned()
            .collect();

        Self {
            removed,
            added,
            set,
            unset,
        }
    }

    /// Returns true if applying this diff would change nothing.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.set.is_empty()
            && self.unset.is_empty()
    }

    /// Returns the operations in application order: removals, additions,
    /// value writes, then value clears.
    ///
    /// Writes for keys of an added context always follow that context's
    /// `AddContext`.
    pub fn ops(&self) -> impl Iterator<Item = DiffOp<'_>> + '_ {
        let removed = self.removed.iter().map(|c| DiffOp::RemoveContext(c));
        let added = self.added.iter().map(|c| DiffOp::AddContext(c));
        let set = self.set.iter().map(|(k, v)| DiffOp::Set(k, v));
        let unset = self.unset.iter().map(|k| DiffOp::Unset(k));
        removed.chain(added).chain(set).chain(unset)
    }
}
