//! Connection manager contract used by the telephony adapter.
//!
//! The connection manager is the middleware owning modems and their packet
//! data contexts. Every call is asynchronous; the adapter issues at most one
//! call at a time.

use async_trait::async_trait;
use parking_lot::Mutex;
use provd_core::{ProvError, ProvResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Backend property holding a context's display name.
pub const PROP_NAME: &str = "Name";
/// Backend property holding a context's access point name.
pub const PROP_APN: &str = "AccessPointName";
/// Backend property holding a context's user name.
pub const PROP_USERNAME: &str = "Username";
/// Backend property holding a context's password.
pub const PROP_PASSWORD: &str = "Password";
/// Backend property holding an MMS context's proxy.
pub const PROP_MMS_PROXY: &str = "MessageProxy";
/// Backend property holding an MMS context's message center URL.
pub const PROP_MMSC: &str = "MessageCenter";

/// Kind of a packet data context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// General internet access.
    Internet,
    /// Multimedia messaging.
    Mms,
}

impl ContextKind {
    /// Returns the backend's name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internet => "internet",
            Self::Mms => "mms",
        }
    }
}

/// A modem known to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modem {
    /// Backend object path.
    pub path: String,
    /// Subscriber identity of the inserted SIM.
    pub imsi: String,
}

/// A packet data context of a modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Backend object path.
    pub path: String,
    /// Context kind.
    pub kind: ContextKind,
    /// Backend properties, keyed by backend property name.
    pub properties: BTreeMap<String, String>,
}

/// Asynchronous access to the connection manager.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Lists the available modems.
    async fn modems(&self) -> ProvResult<Vec<Modem>>;

    /// Lists the contexts of `modem`.
    async fn contexts(&self, modem: &str) -> ProvResult<Vec<Context>>;

    /// Creates a context of `kind` on `modem` and returns its path.
    async fn add_context(&self, modem: &str, kind: ContextKind) -> ProvResult<String>;

    /// Removes the context at `path` from `modem`.
    async fn remove_context(&self, modem: &str, path: &str) -> ProvResult<()>;

    /// Sets property `name` of the context at `path`.
    async fn set_property(&self, path: &str, name: &str, value: &str) -> ProvResult<()>;
}

#[derive(Debug, Default)]
struct ModemEntry {
    imsi: String,
    contexts: BTreeMap<String, Context>,
    next_id: u32,
}

#[derive(Debug, Default)]
struct Inner {
    modems: BTreeMap<String, ModemEntry>,
    calls: Vec<String>,
}

/// Connection manager kept entirely in memory.
///
/// Clones share state. An optional latency is applied to every call, which
/// gives cancellation something to interrupt.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectionManager {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
}

impl InMemoryConnectionManager {
    /// Creates a manager with no modems.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a modem at `path` holding a SIM with `imsi`.
    pub fn with_modem(self, path: impl Into<String>, imsi: impl Into<String>) -> Self {
        self.inner.lock().modems.insert(
            path.into(),
            ModemEntry {
                imsi: imsi.into(),
                ..ModemEntry::default()
            },
        );
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Creates a context directly, bypassing the call log.
    pub fn seed_context(
        &self,
        modem: &str,
        kind: ContextKind,
        properties: &[(&str, &str)],
    ) -> ProvResult<String> {
        let mut inner = self.inner.lock();
        let path = insert_context(&mut inner, modem, kind)?;
        if let Some(context) = inner
            .modems
            .get_mut(modem)
            .and_then(|m| m.contexts.get_mut(&path))
        {
            context.properties.extend(
                properties
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );
        }
        Ok(path)
    }

    /// Returns a snapshot of the contexts of `modem`.
    pub fn snapshot(&self, modem: &str) -> Vec<Context> {
        self.inner
            .lock()
            .modems
            .get(modem)
            .map(|m| m.contexts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a log of the mutating calls received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn insert_context(inner: &mut Inner, modem: &str, kind: ContextKind) -> ProvResult<String> {
    let entry = inner
        .modems
        .get_mut(modem)
        .ok_or_else(|| ProvError::not_found(modem))?;
    entry.next_id += 1;
    let path = format!("{modem}/context{}", entry.next_id);
    entry.contexts.insert(
        path.clone(),
        Context {
            path: path.clone(),
            kind,
            properties: BTreeMap::from([("Type".to_string(), kind.as_str().to_string())]),
        },
    );
    Ok(path)
}

#[async_trait]
impl ConnectionManager for InMemoryConnectionManager {
    async fn modems(&self) -> ProvResult<Vec<Modem>> {
        self.delay().await;
        Ok(self
            .inner
            .lock()
            .modems
            .iter()
            .map(|(path, m)| Modem {
                path: path.clone(),
                imsi: m.imsi.clone(),
            })
            .collect())
    }

    async fn contexts(&self, modem: &str) -> ProvResult<Vec<Context>> {
        self.delay().await;
        self.inner
            .lock()
            .modems
            .get(modem)
            .map(|m| m.contexts.values().cloned().collect())
            .ok_or_else(|| ProvError::not_found(modem))
    }

    async fn add_context(&self, modem: &str, kind: ContextKind) -> ProvResult<String> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.calls.push(format!("add {}", kind.as_str()));
        insert_context(&mut inner, modem, kind)
    }

    async fn remove_context(&self, modem: &str, path: &str) -> ProvResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.calls.push(format!("remove {path}"));
        inner
            .modems
            .get_mut(modem)
            .and_then(|m| m.contexts.remove(path))
            .map(|_| ())
            .ok_or_else(|| ProvError::not_found(path))
    }

    async fn set_property(&self, path: &str, name: &str, value: &str) -> ProvResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.calls.push(format!("set {path} {name}"));
        let context = inner
            .modems
            .values_mut()
            .find_map(|m| m.contexts.get_mut(path))
            .ok_or_else(|| ProvError::not_found(path))?;
        context.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
