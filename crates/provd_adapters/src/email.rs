//! Email adapter.
//!
//! Exposes the accounts of an [`AccountStore`] below `/applications/email/`:
//!
//! ```text
//! /applications/email/<id>/{name,address}
//! /applications/email/<id>/{incoming,outgoing}/{type,host,port,username,password,authtype,usessl}
//! ```
//!
//! The store is read once per process; later sessions start from the state
//! left by the previous sync-out. Both sync directions complete immediately.

use crate::accounts::{Account, AccountStore, ServerSettings};
use provd_core::{
    Adapter, AdapterDescriptor, Diff, MapFile, NodeKind, ProvError, ProvResult, Settings,
    SyncInCompletion, SyncOutCompletion,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Root of the keys owned by the email adapter.
pub const EMAIL_ROOT: &str = "/applications/email/";

const MAP_GROUP: &str = "Default";

const INCOMING_PROTOCOLS: [&str; 12] = [
    "pop", "imap", "imapx", "exchange", "ews", "groupwise", "nntp", "mbox", "mh", "maildir",
    "spooldir", "spool",
];
const OUTGOING_PROTOCOLS: [&str; 3] = ["smtp", "sendmail", "ews"];
const SSL_MODES: [&str; 3] = ["never", "always", "when-possible"];
const INCOMING_AUTH_TYPES: [&str; 7] = [
    "+APOP", "CRAM-MD5", "DIGEST-MD5", "GSSAPI", "PLAIN", "POPB4SMTP", "NTLM",
];
const OUTGOING_AUTH_TYPES: [&str; 7] = [
    "PLAIN", "NTLM", "GSSAPI", "CRAM-MD5", "DIGEST-MD5", "POPB4SMTP", "LOGIN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field<'a> {
    Name,
    Address,
    Server { direction: &'a str, field: &'a str },
}

/// Splits an email key into its account id and field.
fn parse_key(key: &str) -> Option<(&str, Field<'_>)> {
    let rest = key.strip_prefix(EMAIL_ROOT)?;
    let parts: Vec<&str> = rest.split('/').collect();
    let (id, field) = match parts.as_slice() {
        [id, "name"] => (*id, Field::Name),
        [id, "address"] => (*id, Field::Address),
        [id, direction @ ("incoming" | "outgoing"), field]
            if ServerSettings::FIELDS.contains(field) =>
        {
            (
                *id,
                Field::Server {
                    direction: *direction,
                    field: *field,
                },
            )
        }
        _ => return None,
    };
    (!id.is_empty()).then_some((id, field))
}

fn check_value(field: Field<'_>, value: &str) -> bool {
    let Field::Server { direction, field } = field else {
        return true;
    };
    let incoming = direction == "incoming";
    match field {
        "type" if incoming => INCOMING_PROTOCOLS.contains(&value),
        "type" => OUTGOING_PROTOCOLS.contains(&value),
        "authtype" if incoming => INCOMING_AUTH_TYPES.contains(&value),
        "authtype" => OUTGOING_AUTH_TYPES.contains(&value),
        "usessl" => SSL_MODES.contains(&value),
        "port" => value.parse::<u16>().is_ok(),
        _ => true,
    }
}

fn export(account: &Account, id: &str, settings: &mut Settings) {
    let base = format!("{EMAIL_ROOT}{id}");
    if let Some(name) = &account.name {
        settings.insert(format!("{base}/name"), name.clone());
    }
    if let Some(address) = &account.address {
        settings.insert(format!("{base}/address"), address.clone());
    }
    for direction in ["incoming", "outgoing"] {
        let Some(server) = account.server(direction) else {
            continue;
        };
        for field in ServerSettings::FIELDS {
            if let Some(value) = server.get(field) {
                settings.insert(format!("{base}/{direction}/{field}"), value);
            }
        }
    }
}

/// Adapter for email accounts.
pub struct EmailAdapter {
    store: Box<dyn AccountStore>,
    map: MapFile,
    accounts: Option<Vec<Account>>,
    settings: Settings,
}

impl EmailAdapter {
    /// Creates an adapter over `store`, keeping id mappings in `map`.
    pub fn new(store: Box<dyn AccountStore>, map: MapFile) -> Self {
        Self {
            store,
            map,
            accounts: None,
            settings: Settings::new(),
        }
    }

    /// Returns a registry descriptor creating email adapters, each working
    /// on a clone of `store`.
    pub fn descriptor<S>(store: S, map_path: impl Into<PathBuf>) -> AdapterDescriptor
    where
        S: AccountStore + Clone + Sync + 'static,
    {
        let map_path = map_path.into();
        AdapterDescriptor::new("email", EMAIL_ROOT, move || {
            let adapter = EmailAdapter::new(Box::new(store.clone()), MapFile::open(map_path.clone()));
            Ok(Box::new(adapter) as Box<dyn Adapter>)
        })
    }

    fn load(&mut self) -> ProvResult<()> {
        if self.accounts.is_some() {
            return Ok(());
        }

        let accounts = self.store.load()?;
        let mut used = BTreeSet::new();
        let mut settings = Settings::new();

        for account in &accounts {
            if account.uid.is_empty() {
                warn!("skipping account without uid");
                continue;
            }
            let id = match self.map.find_client_id(MAP_GROUP, &account.uid) {
                Some(id) => id.to_string(),
                None => {
                    self.map.store(MAP_GROUP, &account.uid, &account.uid);
                    account.uid.clone()
                }
            };
            used.insert(account.uid.clone());
            export(account, &id, &mut settings);
        }

        self.map.remove_unused(MAP_GROUP, &used);
        if let Err(e) = self.map.save() {
            warn!(error = %e, "unable to save email map file");
        }

        info!(accounts = accounts.len(), "email accounts loaded");
        self.accounts = Some(accounts);
        self.settings = settings;
        Ok(())
    }

    /// Applies `settings` to the store.
    ///
    /// Changes are staged on copies of the accounts and the map, which replace
    /// the loaded state only once the store has accepted them.
    fn write(&mut self, settings: &Settings) -> ProvResult<()> {
        let mut accounts = self.accounts.clone().ok_or(ProvError::Unexpected)?;
        let mut map = self.map.clone();
        let diff = Diff::compute(&self.settings, settings, EMAIL_ROOT);
        if diff.is_empty() {
            debug!("email accounts unchanged");
            return Ok(());
        }

        for id in &diff.removed {
            let Some(uid) = map.find_backend_id(MAP_GROUP, id).map(str::to_string) else {
                continue;
            };
            info!(account = %uid, "removing email account");
            accounts.retain(|a| a.uid != uid);
            map.remove(MAP_GROUP, id)?;
        }

        for id in &diff.added {
            let uid = Uuid::new_v4().to_string();
            info!(account = %uid, id = %id, "adding email account");
            accounts.push(Account::new(uid.as_str()));
            map.store(MAP_GROUP, id, &uid);
        }

        for (key, value) in &diff.set {
            if let Err(e) = update(&mut accounts, &map, key, Some(value)) {
                warn!(key = %key, error = %e, "unable to apply email setting");
            }
        }
        for key in &diff.unset {
            if let Err(e) = update(&mut accounts, &map, key, None) {
                debug!(key = %key, error = %e, "unable to clear email setting");
            }
        }

        self.store.save(&accounts)?;
        if let Err(e) = map.save() {
            warn!(error = %e, "unable to save email map file");
        }
        self.accounts = Some(accounts);
        self.map = map;
        self.settings = settings.clone();
        Ok(())
    }
}

fn update(
    accounts: &mut [Account],
    map: &MapFile,
    key: &str,
    value: Option<&String>,
) -> ProvResult<()> {
    let (id, field) = parse_key(key).ok_or_else(|| ProvError::bad_key(key))?;
    let uid = map
        .find_backend_id(MAP_GROUP, id)
        .ok_or_else(|| ProvError::not_found(id))?;
    let account = accounts
        .iter_mut()
        .find(|a| a.uid == uid)
        .ok_or_else(|| ProvError::not_found(uid))?;

    match field {
        Field::Name => account.name = value.cloned(),
        Field::Address => account.address = value.cloned(),
        Field::Server { direction, field } => {
            let server = account
                .server_mut(direction)
                .ok_or_else(|| ProvError::bad_key(key))?;
            match value {
                Some(value) => server.set(field, value)?,
                None => server.clear(field),
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for EmailAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailAdapter")
            .field("map", &self.map)
            .field("loaded", &self.accounts.is_some())
            .finish_non_exhaustive()
    }
}

impl Adapter for EmailAdapter {
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

    fn validate_set(&self, key: &str, value: &str) -> ProvResult<()> {
        let (_, field) = parse_key(key).ok_or_else(|| ProvError::bad_key(key))?;
        if check_value(field, value) {
            Ok(())
        } else {
            Err(ProvError::denied(key))
        }
    }

    fn validate_del(&self, key: &str) -> ProvResult<NodeKind> {
        let directory = key == EMAIL_ROOT.trim_end_matches('/')
            || key
                .strip_prefix(EMAIL_ROOT)
                .is_some_and(|id| !id.is_empty() && !id.contains('/'));

        if directory {
            Ok(NodeKind::Directory)
        } else {
            Err(ProvError::bad_key(key))
        }
    }
}
