//! Plugin registry.
//!
//! The registry is built once at process start from a list of adapter
//! descriptors and never changes afterwards. Each descriptor owns a root
//! key; a key belongs to the adapter whose root it lies under.

use crate::adapter::Adapter;
use crate::error::{ProvError, ProvResult};
use crate::key::{is_under, validate_key};

/// Constructs a fresh adapter instance.
pub type AdapterFactory = Box<dyn Fn() -> ProvResult<Box<dyn Adapter>> + Send + Sync>;

/// Registration of one backend adapter.
pub struct AdapterDescriptor {
    name: String,
    root: String,
    factory: AdapterFactory,
}

impl AdapterDescriptor {
    /// Creates a descriptor for an adapter owning `root`.
    pub fn new<F>(name: impl Into<String>, root: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ProvResult<Box<dyn Adapter>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            root: root.into(),
            factory: Box::new(factory),
        }
    }

    /// Returns the adapter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the root key, as registered (normally with a trailing `/`).
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the root without its trailing `/`, the form used for
    /// directory operations on the whole subtree.
    pub fn root_dir(&self) -> &str {
        match self.root.strip_suffix('/') {
            Some(dir) if !dir.is_empty() => dir,
            _ => &self.root,
        }
    }

    /// Returns true if `key` lies within this adapter's subtree.
    pub fn owns(&self, key: &str) -> bool {
        is_under(key, self.root_dir())
    }

    /// Instantiates the adapter.
    pub fn create(&self) -> ProvResult<Box<dyn Adapter>> {
        (self.factory)()
    }
}

impl std::fmt::Debug for AdapterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterDescriptor")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Immutable table of adapter registrations.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<AdapterDescriptor>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter registration.
    pub fn with_adapter(mut self, descriptor: AdapterDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validates the registrations.
    ///
    /// Every root must be a valid key and no root may lie under another.
    /// Identical roots conflict as well.
    pub fn check(&self) -> ProvResult<()> {
        for (i, a) in self.descriptors.iter().enumerate() {
            validate_key(a.root()).map_err(|_| {
                ProvError::Corrupt(format!("adapter {} has invalid root {:?}", a.name, a.root))
            })?;

            for b in &self.descriptors[i + 1..] {
                if is_under(a.root_dir(), b.root_dir()) || is_under(b.root_dir(), a.root_dir()) {
                    return Err(ProvError::Corrupt(format!(
                        "roots of {} ({}) and {} ({}) overlap",
                        a.name, a.root, b.name, b.root
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the number of registered adapters.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Returns the descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<&AdapterDescriptor> {
        self.descriptors.get(index)
    }

    /// Iterates over the registrations in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &AdapterDescriptor> {
        self.descriptors.iter()
    }

    /// Returns the index of the adapter owning `key`.
    ///
    /// The root itself with or without its trailing `/` is owned by the
    /// adapter, as is every key below it.
    pub fn find_owner(&self, key: &str) -> ProvResult<usize> {
        self.descriptors
            .iter()
            .position(|d| d.owns(key))
            .ok_or_else(|| ProvError::not_found(key))
    }

    /// Returns the indexes of every adapter whose root is at or below
    /// `prefix`.
    pub fn find_children(&self, prefix: &str) -> Vec<usize> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| is_under(d.root(), prefix))
            .map(|(i, _)| i)
            .collect()
    }
}
