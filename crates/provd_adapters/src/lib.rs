//! # provd Adapters
//!
//! Backend adapters for the provd settings broker.
//!
//! This crate provides:
//! - The telephony adapter, over an asynchronous [`ConnectionManager`]
//! - The email adapter, over a synchronous [`AccountStore`]
//! - The data-sync adapter, over a synchronous [`SyncConfigStore`]
//! - In-memory implementations of every middleware contract, and JSON-file
//!   stores for accounts and sync configurations
//!
//! ## Key Invariants
//!
//! - Telephony backend calls are issued one at a time
//! - Client ids survive restarts through each adapter's map file
//! - Nothing is written to a backend outside sync-out

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod accounts;
mod connman;
mod email;
mod sync;
mod sync_configs;
mod telephony;

pub use accounts::{Account, AccountStore, InMemoryAccountStore, JsonAccountStore, ServerSettings};
pub use connman::{
    ConnectionManager, Context, ContextKind, InMemoryConnectionManager, Modem, PROP_APN,
    PROP_MMSC, PROP_MMS_PROXY, PROP_NAME, PROP_PASSWORD, PROP_USERNAME,
};
pub use email::{EmailAdapter, EMAIL_ROOT};
pub use sync::{SyncAdapter, SYNC_ROOT};
pub use sync_configs::{
    InMemorySyncConfigStore, JsonSyncConfigStore, Properties, SyncConfig, SyncConfigStore,
    PROP_BACKEND,
};
pub use telephony::{TelephonyAdapter, TELEPHONY_ROOT};
