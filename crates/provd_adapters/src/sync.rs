//! Data-sync adapter.
//!
//! Exposes the peer configurations of a [`SyncConfigStore`] below
//! `/applications/sync/`, one context per configuration name:
//!
//! ```text
//! /applications/sync/<id>/{username,password,url,name,client}
//! /applications/sync/<id>/<source>/{uri,sync,format}
//! ```
//!
//! `<source>` is one of `contacts`, `calendar`, `memo`, `todo` or their
//! `eas-` prefixed ActiveSync variants. A plain source and its ActiveSync
//! variant share one section of the configuration, told apart by its
//! backend.

use crate::sync_configs::{SyncConfig, SyncConfigStore, PROP_BACKEND};
use provd_core::{
    Adapter, AdapterDescriptor, Diff, NodeKind, ProvError, ProvResult, Settings,
    SyncInCompletion, SyncOutCompletion,
};
use tracing::{debug, info, warn};

/// Root of the keys owned by the data-sync adapter.
pub const SYNC_ROOT: &str = "/applications/sync/";

const URL_PROP: &str = "syncURL";
const WEB_URL_PROP: &str = "WebURL";

/// Peer-wide settings and the configuration properties behind them.
const GENERAL: [(&str, &str); 5] = [
    ("username", "username"),
    ("password", "password"),
    ("url", URL_PROP),
    ("name", "PeerName"),
    ("client", "PeerIsClient"),
];

/// Source settings and the configuration properties behind them.
const SOURCE_PROPS: [(&str, &str); 3] = [("uri", "uri"), ("sync", "sync"), ("format", "syncFormat")];

#[derive(Debug, PartialEq, Eq)]
struct Source {
    client: &'static str,
    section: &'static str,
    backend: &'static str,
}

static SOURCES: [Source; 8] = [
    Source { client: "contacts", section: "addressbook", backend: "addressbook" },
    Source { client: "calendar", section: "calendar", backend: "calendar" },
    Source { client: "memo", section: "memo", backend: "memo" },
    Source { client: "todo", section: "todo", backend: "todo" },
    Source { client: "eas-contacts", section: "addressbook", backend: "ActiveSync Address Book" },
    Source { client: "eas-calendar", section: "calendar", backend: "ActiveSync Events" },
    Source { client: "eas-memo", section: "memo", backend: "ActiveSync Memos" },
    Source { client: "eas-todo", section: "todo", backend: "ActiveSync Todos" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    General(&'static str),
    Source {
        source: &'static Source,
        prop: &'static str,
    },
}

fn lookup(table: &[(&'static str, &'static str)], local: &str) -> Option<&'static str> {
    table.iter().find(|(l, _)| *l == local).map(|(_, prop)| *prop)
}

/// Splits a sync key into its configuration name and field.
fn parse_key(key: &str) -> Option<(&str, Field)> {
    let rest = key.strip_prefix(SYNC_ROOT)?;
    let parts: Vec<&str> = rest.split('/').collect();
    let (id, field) = match parts.as_slice() {
        [id, local] => (*id, Field::General(lookup(&GENERAL, local)?)),
        [id, client, local] => {
            let source = SOURCES.iter().find(|s| s.client == *client)?;
            let prop = lookup(&SOURCE_PROPS, local)?;
            (*id, Field::Source { source, prop })
        }
        _ => return None,
    };
    (!id.is_empty()).then_some((id, field))
}

fn export(config: &SyncConfig, settings: &mut Settings) {
    let base = format!("{SYNC_ROOT}{}", config.name);
    for (local, prop) in GENERAL {
        let value = config.general.get(prop).or_else(|| {
            (prop == URL_PROP)
                .then(|| config.general.get(WEB_URL_PROP))
                .flatten()
        });
        if let Some(value) = value {
            settings.insert(format!("{base}/{local}"), value.clone());
        }
    }

    for (section, props) in &config.sources {
        let Some(backend) = props.get(PROP_BACKEND) else {
            debug!(config = %config.name, section = %section, "source without backend");
            continue;
        };
        let Some(source) = SOURCES
            .iter()
            .find(|s| s.section == section.as_str() && s.backend == backend.as_str())
        else {
            debug!(config = %config.name, section = %section, backend = %backend, "unknown source type");
            continue;
        };
        for (local, prop) in SOURCE_PROPS {
            if let Some(value) = props.get(prop) {
                settings.insert(format!("{base}/{}/{local}", source.client), value.clone());
            }
        }
    }
}

/// Adapter for data-sync peer configurations.
pub struct SyncAdapter {
    store: Box<dyn SyncConfigStore>,
    configs: Option<Vec<SyncConfig>>,
    settings: Settings,
}

impl SyncAdapter {
    /// Creates an adapter over `store`.
    pub fn new(store: Box<dyn SyncConfigStore>) -> Self {
        Self {
            store,
            configs: None,
            settings: Settings::new(),
        }
    }

    /// Returns a registry descriptor creating sync adapters, each working
    /// on a clone of `store`.
    pub fn descriptor<S>(store: S) -> AdapterDescriptor
    where
        S: SyncConfigStore + Clone + Sync + 'static,
    {
        AdapterDescriptor::new("sync", SYNC_ROOT, move || {
            Ok(Box::new(SyncAdapter::new(Box::new(store.clone()))) as Box<dyn Adapter>)
        })
    }

    fn load(&mut self) -> ProvResult<()> {
        if self.configs.is_some() {
            return Ok(());
        }

        let configs = self.store.load()?;
        let mut settings = Settings::new();
        for config in &configs {
            if config.name.is_empty() || config.name.contains('/') {
                warn!(config = %config.name, "skipping unaddressable sync config");
                continue;
            }
            export(config, &mut settings);
        }

        info!(configs = configs.len(), "sync configs loaded");
        self.configs = Some(configs);
        self.settings = settings;
        Ok(())
    }

    /// Applies `settings` to the store, staging on a copy of the loaded
    /// configurations until the store accepts them.
    fn write(&mut self, settings: &Settings) -> ProvResult<()> {
        let mut configs = self.configs.clone().ok_or(ProvError::Unexpected)?;
        let diff = Diff::compute(&self.settings, settings, SYNC_ROOT);
        if diff.is_empty() {
            debug!("sync configs unchanged");
            return Ok(());
        }

        for id in &diff.removed {
            info!(config = %id, "removing sync config");
            configs.retain(|c| c.name != *id);
        }

        for id in &diff.added {
            if configs.iter().any(|c| c.name == *id) {
                continue;
            }
            info!(config = %id, "adding sync config");
            configs.push(SyncConfig::new(id.as_str()));
        }

        for (key, value) in &diff.set {
            if let Err(e) = update(&mut configs, key, Some(value)) {
                warn!(key = %key, error = %e, "unable to apply sync setting");
            }
        }
        for key in &diff.unset {
            if let Err(e) = update(&mut configs, key, None) {
                debug!(key = %key, error = %e, "unable to clear sync setting");
            }
        }

        self.store.save(&configs)?;
        self.configs = Some(configs);
        self.settings = settings.clone();
        Ok(())
    }
}

fn update(configs: &mut [SyncConfig], key: &str, value: Option<&String>) -> ProvResult<()> {
    let (id, field) = parse_key(key).ok_or_else(|| ProvError::bad_key(key))?;
    let config = configs
        .iter_mut()
        .find(|c| c.name == id)
        .ok_or_else(|| ProvError::not_found(id))?;

    match (field, value) {
        (Field::General(prop), Some(value)) => {
            config.general.insert(prop.to_string(), value.clone());
        }
        (Field::General(prop), None) => {
            config.general.remove(prop);
            if prop == URL_PROP {
                config.general.remove(WEB_URL_PROP);
            }
        }
        (Field::Source { source, prop }, Some(value)) => {
            let section = config.sources.entry(source.section.to_string()).or_default();
            if section.get(PROP_BACKEND).map(String::as_str) != Some(source.backend) {
                debug!(config = %id, source = source.client, "switching source backend");
                section.insert(PROP_BACKEND.to_string(), source.backend.to_string());
            }
            section.insert(prop.to_string(), value.clone());
        }
        (Field::Source { source, prop }, None) => {
            if let Some(section) = config.sources.get_mut(source.section) {
                if section.get(PROP_BACKEND).map(String::as_str) == Some(source.backend) {
                    section.remove(prop);
                }
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("loaded", &self.configs.is_some())
            .finish_non_exhaustive()
    }
}

impl Adapter for SyncAdapter {
    fn sync_in(&mut self, _context_id: &str, done: SyncInCompletion) -> ProvResult<()> {
        self.load()?;
        done.complete(Ok(self.settings.clone()));
        Ok(())
    }

    fn cancel_sync_in(&mut self) {}

    fn sync_out(&mut self, settings: Settings, done: SyncOutCompletion) -> ProvResult<()> {
        let result = self.write(&settings);
        done.complete(result);
        Ok(())
    }

    fn cancel_sync_out(&mut self) {}

    fn validate_set(&self, key: &str, _value: &str) -> ProvResult<()> {
        parse_key(key)
            .map(|_| ())
            .ok_or_else(|| ProvError::bad_key(key))
    }

    fn validate_del(&self, key: &str) -> ProvResult<NodeKind> {
        let directory = key == SYNC_ROOT.trim_end_matches('/')
            || key
                .strip_prefix(SYNC_ROOT)
                .is_some_and(|id| !id.is_empty() && !id.contains('/'));

        if directory {
            Ok(NodeKind::Directory)
        } else {
            Err(ProvError::bad_key(key))
        }
    }
}
