//! Adapter registry per instance.

use provd_adapters::{
    EmailAdapter, InMemoryConnectionManager, JsonAccountStore, JsonSyncConfigStore, SyncAdapter,
    TelephonyAdapter,
};
use provd_core::Registry;
use provd_server::{Instance, ServerConfig};
use std::sync::Arc;

/// File holding the session instance's email accounts.
pub const EMAIL_STORE: &str = "email-accounts.json";

/// File holding the session instance's sync peer configurations.
pub const SYNC_STORE: &str = "sync-configs.json";

/// Builds the registry hosted by `config.instance`.
///
/// The system instance drives an in-memory connection manager with one
/// modem per entry of `imsis`.
pub fn build(config: &ServerConfig, imsis: &[String]) -> Registry {
    match config.instance {
        Instance::System => {
            let manager = imsis
                .iter()
                .enumerate()
                .fold(InMemoryConnectionManager::new(), |manager, (i, imsi)| {
                    manager.with_modem(format!("/modem{i}"), imsi.clone())
                });
            Registry::new().with_adapter(TelephonyAdapter::descriptor(
                Arc::new(manager),
                config.map_file_path("telephony"),
            ))
        }
        Instance::Session => Registry::new()
            .with_adapter(EmailAdapter::descriptor(
                JsonAccountStore::new(config.store_path(EMAIL_STORE)),
                config.map_file_path("email"),
            ))
            .with_adapter(SyncAdapter::descriptor(JsonSyncConfigStore::new(
                config.store_path(SYNC_STORE),
            ))),
    }
}
