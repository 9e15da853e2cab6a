//! Data-sync peer configurations and their stores.

use crate::accounts::{read_records, write_records};
use parking_lot::Mutex;
use provd_core::ProvResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Properties of one section of a configuration, keyed by backend name.
pub type Properties = BTreeMap<String, String>;

/// Property naming the storage backend of a source section.
pub const PROP_BACKEND: &str = "backend";

/// A named sync peer configuration.
///
/// `general` holds peer-wide properties such as `syncURL`. Each entry of
/// `sources` is keyed by source name (`addressbook`, `calendar`, `memo`,
/// `todo`) and carries a [`PROP_BACKEND`] property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Configuration name, unique within a store.
    pub name: String,
    /// Peer-wide properties.
    #[serde(default)]
    pub general: Properties,
    /// Per-source properties.
    #[serde(default)]
    pub sources: BTreeMap<String, Properties>,
}

impl SyncConfig {
    /// Creates an empty configuration called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets a peer-wide property.
    pub fn with_general(mut self, prop: &str, value: &str) -> Self {
        self.general.insert(prop.to_string(), value.to_string());
        self
    }

    /// Sets a property of `source`, creating the section if needed.
    pub fn with_source(mut self, source: &str, prop: &str, value: &str) -> Self {
        self.sources
            .entry(source.to_string())
            .or_default()
            .insert(prop.to_string(), value.to_string());
        self
    }
}

/// Storage for sync configurations.
pub trait SyncConfigStore: Send {
    /// Loads every configuration.
    fn load(&mut self) -> ProvResult<Vec<SyncConfig>>;

    /// Replaces the stored configurations with `configs`.
    fn save(&mut self, configs: &[SyncConfig]) -> ProvResult<()>;
}

/// Configuration store kept in memory. Clones share their configurations.
#[derive(Debug, Clone, Default)]
pub struct InMemorySyncConfigStore {
    configs: Arc<Mutex<Vec<SyncConfig>>>,
}

impl InMemorySyncConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `config` to the store.
    pub fn with_config(self, config: SyncConfig) -> Self {
        self.configs.lock().push(config);
        self
    }

    /// Returns the stored configurations.
    pub fn configs(&self) -> Vec<SyncConfig> {
        self.configs.lock().clone()
    }
}

impl SyncConfigStore for InMemorySyncConfigStore {
    fn load(&mut self) -> ProvResult<Vec<SyncConfig>> {
        Ok(self.configs())
    }

    fn save(&mut self, configs: &[SyncConfig]) -> ProvResult<()> {
        *self.configs.lock() = configs.to_vec();
        Ok(())
    }
}

/// Configuration store persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonSyncConfigStore {
    path: PathBuf,
}

impl JsonSyncConfigStore {
    /// Creates a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SyncConfigStore for JsonSyncConfigStore {
    fn load(&mut self) -> ProvResult<Vec<SyncConfig>> {
        read_records(&self.path)
    }

    fn save(&mut self, configs: &[SyncConfig]) -> ProvResult<()> {
        write_records(&self.path, configs)
    }
}
