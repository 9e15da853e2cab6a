//! Email account records and their stores.

use parking_lot::Mutex;
use provd_core::{ProvError, ProvResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Connection settings of one direction of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Protocol name, such as `imap` or `smtp`.
    pub protocol: Option<String>,
    /// Server host name.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Login name.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Authentication mechanism.
    pub auth_type: Option<String>,
    /// TLS policy: `never`, `always` or `when-possible`.
    pub use_ssl: Option<String>,
}

impl ServerSettings {
    /// Names of the fields as they appear in keys.
    pub const FIELDS: [&'static str; 7] = [
        "type", "host", "port", "username", "password", "authtype", "usessl",
    ];

    /// Returns the value of `field` formatted as a setting.
    pub fn get(&self, field: &str) -> Option<String> {
        match field {
            "type" => self.protocol.clone(),
            "host" => self.host.clone(),
            "port" => self.port.map(|p| p.to_string()),
            "username" => self.username.clone(),
            "password" => self.password.clone(),
            "authtype" => self.auth_type.clone(),
            "usessl" => self.use_ssl.clone(),
            _ => None,
        }
    }

    /// Sets `field` from a setting value.
    pub fn set(&mut self, field: &str, value: &str) -> ProvResult<()> {
        let owned = Some(value.to_string());
        match field {
            "type" => self.protocol = owned,
            "host" => self.host = owned,
            "port" => self.port = Some(value.parse().map_err(|_| ProvError::denied(field))?),
            "username" => self.username = owned,
            "password" => self.password = owned,
            "authtype" => self.auth_type = owned,
            "usessl" => self.use_ssl = owned,
            _ => return Err(ProvError::bad_key(field)),
        }
        Ok(())
    }

    /// Clears `field`.
    pub fn clear(&mut self, field: &str) {
        match field {
            "type" => self.protocol = None,
            "host" => self.host = None,
            "port" => self.port = None,
            "username" => self.username = None,
            "password" => self.password = None,
            "authtype" => self.auth_type = None,
            "usessl" => self.use_ssl = None,
            _ => {}
        }
    }
}

/// An email account as held by the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned unique id.
    pub uid: String,
    /// Display name of the account.
    #[serde(default)]
    pub name: Option<String>,
    /// Sender address.
    #[serde(default)]
    pub address: Option<String>,
    /// Whether the account is in use.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Settings for receiving mail.
    #[serde(default)]
    pub incoming: ServerSettings,
    /// Settings for sending mail.
    #[serde(default)]
    pub outgoing: ServerSettings,
}

fn enabled_default() -> bool {
    true
}

impl Account {
    /// Creates an enabled, empty account.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
            address: None,
            enabled: true,
            incoming: ServerSettings::default(),
            outgoing: ServerSettings::default(),
        }
    }

    /// Returns the settings of one direction, `incoming` or `outgoing`.
    pub fn server(&self, direction: &str) -> Option<&ServerSettings> {
        match direction {
            "incoming" => Some(&self.incoming),
            "outgoing" => Some(&self.outgoing),
            _ => None,
        }
    }

    /// Mutable variant of [`Account::server`].
    pub fn server_mut(&mut self, direction: &str) -> Option<&mut ServerSettings> {
        match direction {
            "incoming" => Some(&mut self.incoming),
            "outgoing" => Some(&mut self.outgoing),
            _ => None,
        }
    }
}

/// Storage for email accounts.
pub trait AccountStore: Send {
    /// Loads every account.
    fn load(&mut self) -> ProvResult<Vec<Account>>;

    /// Replaces the stored accounts with `accounts`.
    fn save(&mut self, accounts: &[Account]) -> ProvResult<()>;
}

/// Account store kept in memory. Clones share their accounts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<Mutex<Vec<Account>>>,
}

impl InMemoryAccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `account` to the store.
    pub fn with_account(self, account: Account) -> Self {
        self.accounts.lock().push(account);
        self
    }

    /// Returns the stored accounts.
    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.lock().clone()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn load(&mut self) -> ProvResult<Vec<Account>> {
        Ok(self.accounts())
    }

    fn save(&mut self, accounts: &[Account]) -> ProvResult<()> {
        *self.accounts.lock() = accounts.to_vec();
        Ok(())
    }
}

/// Account store persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonAccountStore {
    path: PathBuf,
}

impl JsonAccountStore {
    /// Creates a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AccountStore for JsonAccountStore {
    fn load(&mut self) -> ProvResult<Vec<Account>> {
        read_records(&self.path)
    }

    fn save(&mut self, accounts: &[Account]) -> ProvResult<()> {
        write_records(&self.path, accounts)
    }
}

/// Reads a JSON array of records. A missing file holds no records.
pub(crate) fn read_records<T: DeserializeOwned>(path: &Path) -> ProvResult<Vec<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replaces `path` with `records`, writing a tmp file and renaming it over.
pub(crate) fn write_records<T: Serialize>(path: &Path, records: &[T]) -> ProvResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&serde_json::to_vec_pretty(records)?)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provd_testkit::prelude::temp_data_dir;

    #[test]
    fn fields_round_trip_through_settings() {
        let mut server = ServerSettings::default();
        for field in ServerSettings::FIELDS {
            let value = if field == "port" { "993" } else { "v" };
            server.set(field, value).unwrap();
            assert_eq!(server.get(field).as_deref(), Some(value));
        }
        server.clear("host");
        assert_eq!(server.get("host"), None);
    }

    #[test]
    fn non_numeric_port_is_denied() {
        let mut server = ServerSettings::default();
        assert!(matches!(server.set("port", "imap"), Err(ProvError::Denied(_))));
        assert!(matches!(server.set("colour", "red"), Err(ProvError::BadKey(_))));
    }

    #[test]
    fn json_store_persists_accounts() {
        let dir = temp_data_dir();
        let path = dir.path().join("accounts.json");
        let mut store = JsonAccountStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let mut account = Account::new("uid-1");
        account.name = Some("Work".into());
        account.incoming.port = Some(993);
        store.save(&[account.clone()]).unwrap();

        let mut reopened = JsonAccountStore::new(&path);
        assert_eq!(reopened.load().unwrap(), vec![account]);
    }

    #[test]
    fn json_store_rejects_garbage() {
        let dir = temp_data_dir();
        let path = dir.path().join("accounts.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            JsonAccountStore::new(&path).load(),
            Err(ProvError::Serialization(_))
        ));
    }
}
