//! Test fixtures.

use crate::scripted::ScriptHandle;
use provd_core::{Registry, Settings};
use std::sync::Arc;

/// Builds a settings map from string pairs.
pub fn settings(pairs: &[(&str, &str)]) -> Settings {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Builds a registry of scripted adapters, in the given order.
pub fn registry_of(adapters: &[(&str, &ScriptHandle)]) -> Arc<Registry> {
    let registry = adapters
        .iter()
        .fold(Registry::new(), |registry, (name, handle)| {
            registry.with_adapter(handle.descriptor(name))
        });
    Arc::new(registry)
}

/// Creates a temporary directory for map files and account stores.
pub fn temp_data_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}
