//! Client-id to backend-id map file.
//!
//! Clients name objects (accounts, connection contexts) with ids of their
//! own choosing, while backends assign their own identifiers. Each adapter
//! keeps a persistent two-way mapping between the two, grouped by a context
//! discriminator such as the SIM's IMSI.
//!
//! The file is a JSON document of the form
//! `{ "<group>": { "<client id>": "<backend id>" } }`.

use crate::error::{ProvError, ProvResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

type Groups = BTreeMap<String, BTreeMap<String, String>>;

/// Persistent keyed lookup store linking client ids to backend ids.
#[derive(Debug, Clone, Default)]
pub struct MapFile {
    path: Option<PathBuf>,
    groups: Groups,
    dirty: bool,
}

impl MapFile {
    /// Opens the map file at `path`.
    ///
    /// A missing file yields an empty store. An unreadable or malformed file
    /// is logged and treated as empty; it is overwritten on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let groups = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(groups) => groups,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "discarding malformed map file");
                    Groups::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Groups::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to read map file");
                Groups::new()
            }
        };

        Self {
            path: Some(path),
            groups,
            dirty: false,
        }
    }

    /// Creates a store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Returns the backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records that `client_id` maps to `backend_id` within `group`.
    pub fn store(&mut self, group: &str, client_id: &str, backend_id: &str) {
        let previous = self
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(client_id.to_string(), backend_id.to_string());
        if previous.as_deref() != Some(backend_id) {
            self.dirty = true;
        }
    }

    /// Removes the mapping for `client_id` within `group`.
    pub fn remove(&mut self, group: &str, client_id: &str) -> ProvResult<()> {
        let entries = self
            .groups
            .get_mut(group)
            .ok_or_else(|| ProvError::not_found(group))?;
        entries
            .remove(client_id)
            .ok_or_else(|| ProvError::not_found(client_id))?;
        if entries.is_empty() {
            self.groups.remove(group);
        }
        self.dirty = true;
        Ok(())
    }

    /// Returns the backend id mapped to `client_id`.
    pub fn find_backend_id(&self, group: &str, client_id: &str) -> Option<&str> {
        self.groups
            .get(group)?
            .get(client_id)
            .map(String::as_str)
    }

    /// Returns the client id mapped to `backend_id`.
    pub fn find_client_id(&self, group: &str, backend_id: &str) -> Option<&str> {
        self.groups
            .get(group)?
            .iter()
            .find(|(_, b)| b.as_str() == backend_id)
            .map(|(c, _)| c.as_str())
    }

    /// Drops every mapping in `group` whose backend id is not in `used`.
    pub fn remove_unused(&mut self, group: &str, used: &BTreeSet<String>) {
        let Some(entries) = self.groups.get_mut(group) else {
            return;
        };
        let before = entries.len();
        entries.retain(|client_id, backend_id| {
            let keep = used.contains(backend_id);
            if !keep {
                tracing::debug!(group, client_id = %client_id, backend_id = %backend_id, "removing unused mapping");
            }
            keep
        });
        if entries.len() != before {
            self.dirty = true;
        }
        if entries.is_empty() {
            self.groups.remove(group);
        }
    }

    /// Writes the store to disk if it has unsaved changes.
    pub fn save(&mut self) -> ProvResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("tmp");
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(&self.groups)?)?;
            file.sync_all()?;
            fs::rename(&tmp, path)?;
        }
        self.dirty = false;
        Ok(())
    }
}
