//! # provd Core
//!
//! Core types for the provd device-settings broker.
//!
//! This crate provides:
//! - Key validation (absolute `/`-delimited paths, no empty segments)
//! - The `Settings` map and context helpers
//! - The diff engine that turns two snapshots into add/remove/set operations
//! - The backend adapter contract and its completion handles
//! - The plugin registry (ownership by key prefix)
//! - The keyed map file linking client ids to backend ids
//!
//! ## Key Invariants
//!
//! - Every adapter root is a valid key and no root is a prefix of another
//! - A key is owned by at most one adapter
//! - An accepted asynchronous adapter operation always produces exactly one
//!   completion event, even when the adapter drops its handle

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod diff;
mod error;
mod key;
mod map_file;
mod registry;
mod settings;

pub use adapter::{
    event_channel, Adapter, Completion, EngineEvent, EventReceiver, EventSender, NodeKind,
    SyncInCompletion, SyncOutCompletion,
};
pub use diff::{Diff, DiffOp};
pub use error::{ErrorKind, ProvError, ProvResult};
pub use key::{is_under, join_key, validate_key};
pub use map_file::MapFile;
pub use registry::{AdapterDescriptor, AdapterFactory, Registry};
pub use settings::{context_of, contexts, Settings};
