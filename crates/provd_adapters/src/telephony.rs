//! Telephony adapter.
//!
//! Exposes the packet data contexts of a modem below `/telephony/`:
//!
//! ```text
//! /telephony/contexts/<id>/{name,apn,username,password}
//! /telephony/mms/{name,apn,username,password,proxy,mmsc}
//! ```
//!
//! Context ids are chosen by clients and linked to backend context paths
//! through a map file grouped by IMSI. Backend calls run on a spawned task,
//! one at a time, and can be interrupted through a cancellation token.

use crate::connman::{
    ConnectionManager, ContextKind, PROP_APN, PROP_MMSC, PROP_MMS_PROXY, PROP_NAME,
    PROP_PASSWORD, PROP_USERNAME,
};
use parking_lot::Mutex;
use provd_core::{
    context_of, join_key, Adapter, AdapterDescriptor, Diff, DiffOp, MapFile, NodeKind, ProvError,
    ProvResult, Settings, SyncInCompletion, SyncOutCompletion,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Root of the keys owned by the telephony adapter.
pub const TELEPHONY_ROOT: &str = "/telephony/";

const CONTEXTS_ROOT: &str = "/telephony/contexts/";
const MMS_ROOT: &str = "/telephony/mms/";

const CONTEXT_PROPERTIES: [(&str, &str); 4] = [
    ("name", PROP_NAME),
    ("apn", PROP_APN),
    ("username", PROP_USERNAME),
    ("password", PROP_PASSWORD),
];

const MMS_PROPERTIES: [(&str, &str); 2] = [("proxy", PROP_MMS_PROXY), ("mmsc", PROP_MMSC)];

fn backend_property(local: &str, mms: bool) -> Option<&'static str> {
    let extra: &[(&str, &str)] = if mms { &MMS_PROPERTIES } else { &[] };
    CONTEXT_PROPERTIES
        .iter()
        .chain(extra)
        .find(|(l, _)| *l == local)
        .map(|(_, b)| *b)
}

fn local_property(backend: &str, mms: bool) -> Option<&'static str> {
    let extra: &[(&str, &str)] = if mms { &MMS_PROPERTIES } else { &[] };
    CONTEXT_PROPERTIES
        .iter()
        .chain(extra)
        .find(|(_, b)| *b == backend)
        .map(|(l, _)| *l)
}

/// State of the modem found by the last successful sync-in.
#[derive(Debug, Clone)]
struct Session {
    modem: String,
    group: String,
    mms: Option<String>,
    settings: Settings,
}

#[derive(Debug)]
struct Shared {
    map: MapFile,
    session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    RemoveContext(String),
    RemoveMms,
    AddContext(String),
    AddMms,
    Set { key: String, value: String },
}

/// Adapter for the connection manager's modems and contexts.
pub struct TelephonyAdapter {
    manager: Arc<dyn ConnectionManager>,
    shared: Arc<Mutex<Shared>>,
    cancel: Option<CancellationToken>,
}

impl TelephonyAdapter {
    /// Creates an adapter talking to `manager`, keeping id mappings in `map`.
    pub fn new(manager: Arc<dyn ConnectionManager>, map: MapFile) -> Self {
        Self {
            manager,
            shared: Arc::new(Mutex::new(Shared { map, session: None })),
            cancel: None,
        }
    }

    /// Returns a registry descriptor creating telephony adapters.
    pub fn descriptor(
        manager: Arc<dyn ConnectionManager>,
        map_path: impl Into<PathBuf>,
    ) -> AdapterDescriptor {
        let map_path = map_path.into();
        AdapterDescriptor::new("telephony", TELEPHONY_ROOT, move || {
            let adapter = TelephonyAdapter::new(Arc::clone(&manager), MapFile::open(map_path.clone()));
            Ok(Box::new(adapter) as Box<dyn Adapter>)
        })
    }

    /// Runs `work` on the current runtime, racing it against a fresh
    /// cancellation token.
    fn spawn<T, W, F>(&mut self, work: W, finish: F) -> ProvResult<()>
    where
        T: Send + 'static,
        W: Future<Output = ProvResult<T>> + Send + 'static,
        F: FnOnce(ProvResult<T>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProvError::subsystem(format!("no async runtime: {e}")))?;
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProvError::Cancelled),
                result = work => result,
            };
            finish(result);
        });
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(token) = &self.cancel {
            debug!("cancelling telephony call");
            token.cancel();
        }
    }
}

impl std::fmt::Debug for TelephonyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyAdapter")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Adapter for TelephonyAdapter {
    fn sync_in(&mut self, context_id: &str, done: SyncInCompletion) -> ProvResult<()> {
        self.shared.lock().session = None;

        let manager = Arc::clone(&self.manager);
        let shared = Arc::clone(&self.shared);
        let imsi = context_id.to_string();
        self.spawn(
            async move { load(manager.as_ref(), &shared, &imsi).await },
            move |result| done.complete(result),
        )
    }

    fn cancel_sync_in(&mut self) {
        self.cancel();
    }

    fn sync_out(&mut self, settings: Settings, done: SyncOutCompletion) -> ProvResult<()> {
        let session = self
            .shared
            .lock()
            .session
            .clone()
            .ok_or_else(|| ProvError::not_found("modem"))?;
        let commands = plan(&session, &settings);
        info!(modem = %session.modem, commands = commands.len(), "applying telephony settings");

        let manager = Arc::clone(&self.manager);
        let worker_shared = Arc::clone(&self.shared);
        let shared = Arc::clone(&self.shared);
        self.spawn(
            async move { apply(manager.as_ref(), &worker_shared, &session, commands).await },
            move |result| {
                let mut guard = shared.lock();
                if let Err(e) = guard.map.save() {
                    warn!(error = %e, "unable to save telephony map file");
                }
                if let (Ok(mms), Some(session)) = (&result, guard.session.as_mut()) {
                    session.mms = mms.clone();
                    session.settings = settings;
                }
                drop(guard);
                done.complete(result.map(|_| ()));
            },
        )
    }

    fn cancel_sync_out(&mut self) {
        self.cancel();
    }

    fn validate_set(&self, key: &str, _value: &str) -> ProvResult<()> {
        let known = if let Some(local) = key.strip_prefix(MMS_ROOT) {
            backend_property(local, true).is_some()
        } else if let Some(rest) = key.strip_prefix(CONTEXTS_ROOT) {
            matches!(rest.split_once('/'), Some((id, prop))
                if !id.is_empty() && backend_property(prop, false).is_some())
        } else {
            false
        };

        if known {
            Ok(())
        } else {
            Err(ProvError::bad_key(key))
        }
    }

    fn validate_del(&self, key: &str) -> ProvResult<NodeKind> {
        let directory = matches!(key, "/telephony" | "/telephony/mms" | "/telephony/contexts")
            || key
                .strip_prefix(CONTEXTS_ROOT)
                .is_some_and(|id| !id.is_empty() && !id.contains('/'));

        if directory {
            Ok(NodeKind::Directory)
        } else {
            Err(ProvError::bad_key(key))
        }
    }

    fn destroy(&mut self) {
        self.cancel();
    }
}

/// Reads the contexts of the modem holding `imsi`, or of the first modem
/// when `imsi` is empty.
async fn load(
    manager: &dyn ConnectionManager,
    shared: &Mutex<Shared>,
    imsi: &str,
) -> ProvResult<Settings> {
    let modem = manager
        .modems()
        .await?
        .into_iter()
        .find(|m| imsi.is_empty() || m.imsi == imsi)
        .ok_or_else(|| ProvError::not_found(if imsi.is_empty() { "modem" } else { imsi }))?;
    let contexts = manager.contexts(&modem.path).await?;

    let mut guard = shared.lock();
    let Shared { map, session } = &mut *guard;
    let group = modem.imsi.clone();
    let mut settings = Settings::new();
    let mut mms: Option<String> = None;
    let mut used = BTreeSet::new();

    for context in contexts {
        let (prefix, is_mms) = match context.kind {
            ContextKind::Mms if mms.is_some() => {
                debug!(path = %context.path, "ignoring extra mms context");
                continue;
            }
            ContextKind::Mms => {
                mms = Some(context.path.clone());
                (MMS_ROOT.to_string(), true)
            }
            ContextKind::Internet => {
                let id = match map.find_client_id(&group, &context.path) {
                    Some(id) => id.to_string(),
                    None => {
                        let id = fresh_id(map, &group, &context.path);
                        map.store(&group, &id, &context.path);
                        id
                    }
                };
                used.insert(context.path.clone());
                (join_key(CONTEXTS_ROOT, &id), false)
            }
        };

        for (name, value) in &context.properties {
            if let Some(local) = local_property(name, is_mms) {
                settings.insert(join_key(&prefix, local), value.clone());
            }
        }
    }

    map.remove_unused(&group, &used);
    if let Err(e) = map.save() {
        warn!(error = %e, "unable to save telephony map file");
    }

    info!(modem = %modem.path, keys = settings.len(), "telephony settings loaded");
    *session = Some(Session {
        modem: modem.path,
        group,
        mms,
        settings: settings.clone(),
    });
    Ok(settings)
}

/// Derives a client id for an unmapped backend context from the last
/// segment of its path.
fn fresh_id(map: &MapFile, group: &str, path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    let base = if base.is_empty() { "context" } else { base };
    let mut id = base.to_string();
    let mut n = 1;
    while map.find_backend_id(group, &id).is_some() {
        n += 1;
        id = format!("{base}-{n}");
    }
    id
}

fn plan(session: &Session, new: &Settings) -> Vec<Command> {
    let diff = Diff::compute(&session.settings, new, CONTEXTS_ROOT);
    let has_mms = new.keys().any(|k| k.starts_with(MMS_ROOT));
    let mut remove_mms = session.mms.is_some() && !has_mms;
    let mut add_mms = session.mms.is_none() && has_mms;

    let mut commands = Vec::new();
    let mut unset = 0;
    for op in diff.ops() {
        // the mms context goes away after the removals and appears after the additions
        if remove_mms && !matches!(op, DiffOp::RemoveContext(_)) {
            commands.push(Command::RemoveMms);
            remove_mms = false;
        }
        if add_mms && matches!(op, DiffOp::Set(..) | DiffOp::Unset(_)) {
            commands.push(Command::AddMms);
            add_mms = false;
        }
        match op {
            DiffOp::RemoveContext(id) => commands.push(Command::RemoveContext(id.to_string())),
            DiffOp::AddContext(id) => commands.push(Command::AddContext(id.to_string())),
            DiffOp::Set(key, value) => commands.push(Command::Set {
                key: key.to_string(),
                value: value.to_string(),
            }),
            DiffOp::Unset(_) => unset += 1,
        }
    }
    if remove_mms {
        commands.push(Command::RemoveMms);
    }
    if add_mms {
        commands.push(Command::AddMms);
    }

    if unset > 0 {
        debug!(keys = unset, "telephony properties cannot be cleared");
    }
    commands
}

/// Executes `commands` in order and returns the resulting mms context path.
///
/// A failing command is logged and skipped.
async fn apply(
    manager: &dyn ConnectionManager,
    shared: &Mutex<Shared>,
    session: &Session,
    commands: Vec<Command>,
) -> ProvResult<Option<String>> {
    let mut mms = session.mms.clone();
    for command in &commands {
        if let Err(e) = run(manager, shared, session, &mut mms, command).await {
            warn!(command = ?command, error = %e, "telephony command failed");
        }
    }
    Ok(mms)
}

async fn run(
    manager: &dyn ConnectionManager,
    shared: &Mutex<Shared>,
    session: &Session,
    mms: &mut Option<String>,
    command: &Command,
) -> ProvResult<()> {
    match command {
        Command::RemoveContext(id) => {
            let path = backend_path(shared, session, id)?;
            manager.remove_context(&session.modem, &path).await?;
            shared.lock().map.remove(&session.group, id)?;
        }
        Command::RemoveMms => {
            if let Some(path) = mms.take() {
                manager.remove_context(&session.modem, &path).await?;
            }
        }
        Command::AddContext(id) => {
            let path = manager
                .add_context(&session.modem, ContextKind::Internet)
                .await?;
            shared.lock().map.store(&session.group, id, &path);
        }
        Command::AddMms => {
            *mms = Some(manager.add_context(&session.modem, ContextKind::Mms).await?);
        }
        Command::Set { key, value } => {
            let (path, property) = if let Some(local) = key.strip_prefix(MMS_ROOT) {
                let path = mms.clone().ok_or_else(|| ProvError::not_found(key.as_str()))?;
                (path, backend_property(local, true))
            } else {
                let id = context_of(key, CONTEXTS_ROOT).ok_or_else(|| ProvError::bad_key(key.as_str()))?;
                let local = key.rsplit('/').next().unwrap_or_default();
                (backend_path(shared, session, id)?, backend_property(local, false))
            };
            let property = property.ok_or_else(|| ProvError::bad_key(key.as_str()))?;
            manager.set_property(&path, property, value).await?;
        }
    }
    Ok(())
}

fn backend_path(shared: &Mutex<Shared>, session: &Session, id: &str) -> ProvResult<String> {
    shared
        .lock()
        .map
        .find_backend_id(&session.group, id)
        .map(str::to_string)
        .ok_or_else(|| ProvError::not_found(id))
}
