//! # provd Server
//!
//! Session coordinator for the provd settings broker.
//!
//! This crate provides:
//! - The coordinator actor enforcing a single session holder with a FIFO of
//!   waiting clients
//! - Holder-disconnect detection and the idle timeout
//! - Cooperative shutdown that waits for the in-flight sync to cancel
//! - In-process client handles exposing the RPC surface
//!
//! # Architecture
//!
//! ```text
//!  Client ──┐
//!  Client ──┼── Request (mpsc) ──► Coordinator ──► Task queue ──► PluginManager
//!  Client ──┘                          ▲                              │
//!                                      └──── EngineEvent (mpsc) ◄─────┘
//! ```
//!
//! All session state lives inside the coordinator task. Clients and adapters
//! only talk to it through channels, so no locks guard the caches.
//!
//! # Protocol
//!
//! 1. `Start` makes the caller the holder, or queues it behind the holder
//! 2. The holder's `Get`/`Set`/`Delete` calls run in arrival order
//! 3. `End` replies at once; the caches are flushed by sync-out
//! 4. The next queued client is promoted once sync-out completes

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod coordinator;
mod protocol;
mod server;

pub use config::{Instance, ServerConfig};
pub use protocol::{Call, ClientId};
pub use provd_engine::Reply;
pub use server::{Broker, BrokerHandle, Client};
