//! # provd Engine
//!
//! Session engine for the provd settings broker.
//!
//! This crate provides:
//! - The plugin manager state machine (idle → sync-in → idle → sync-out)
//! - Session caches, one per adapter, and the get/set/delete operations
//!   served from them
//! - The task pipeline binding a queued call to its deferred reply
//!
//! ## Key Invariants
//!
//! - Adapters are driven one at a time, in registry order
//! - A cancelled sync clears every cache
//! - Cache operations are only served while the manager is idle
//! - Nothing reaches a backend before sync-out

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod manager;
mod task;

pub use manager::{ManagerState, PluginManager};
pub use task::{Reply, Task, TaskKind, TaskOutcome, TaskReply};
