//! Backend adapter contract.
//!
//! An adapter owns one subtree of the key space and translates it to and
//! from a middleware's native representation. Sync-in and sync-out are
//! asynchronous: the adapter either rejects the call synchronously by
//! returning `Err`, or accepts it and later delivers exactly one result
//! through the [`Completion`] handle it was given.
//!
//! Completions are posted as [`EngineEvent`]s onto the queue drained by the
//! session coordinator, so every state change happens on one logical
//! thread no matter where the adapter finishes its work.

use crate::error::{ProvError, ProvResult};
use crate::settings::Settings;
use tokio::sync::mpsc;

/// Classification returned by [`Adapter::validate_del`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The key names a single setting.
    Leaf,
    /// The key names a directory; every key below it is removed.
    Directory,
}

/// Events drained by the coordinator's event loop.
#[derive(Debug)]
pub enum EngineEvent {
    /// An adapter finished a sync-in.
    SyncIn {
        /// Operation ticket the completion was issued for.
        ticket: u64,
        /// Registry index of the adapter.
        index: usize,
        /// Settings read from the backend.
        result: ProvResult<Settings>,
    },
    /// An adapter finished a sync-out.
    SyncOut {
        /// Operation ticket the completion was issued for.
        ticket: u64,
        /// Registry index of the adapter.
        index: usize,
        /// Outcome of the flush.
        result: ProvResult<()>,
    },
    /// The plugin manager finished a whole sync-in or sync-out pass.
    Finished {
        /// Outcome of the pass.
        result: ProvResult<()>,
    },
}

/// Sending half of the engine event queue.
pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half of the engine event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Creates an engine event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Single-use handle through which an adapter reports an async result.
///
/// Dropping the handle without calling [`Completion::complete`] reports
/// [`ProvError::Cancelled`], so an abandoned operation still resumes the
/// coordinator.
pub struct Completion<T> {
    ticket: u64,
    index: usize,
    events: Option<EventSender>,
    wrap: fn(u64, usize, ProvResult<T>) -> EngineEvent,
}

/// Completion handle for sync-in.
pub type SyncInCompletion = Completion<Settings>;

/// Completion handle for sync-out.
pub type SyncOutCompletion = Completion<()>;

impl Completion<Settings> {
    /// Creates a sync-in completion for the adapter at `index`.
    pub fn sync_in(ticket: u64, index: usize, events: EventSender) -> Self {
        Self {
            ticket,
            index,
            events: Some(events),
            wrap: |ticket, index, result| EngineEvent::SyncIn {
                ticket,
                index,
                result,
            },
        }
    }
}

impl Completion<()> {
    /// Creates a sync-out completion for the adapter at `index`.
    pub fn sync_out(ticket: u64, index: usize, events: EventSender) -> Self {
        Self {
            ticket,
            index,
            events: Some(events),
            wrap: |ticket, index, result| EngineEvent::SyncOut {
                ticket,
                index,
                result,
            },
        }
    }
}

impl<T> Completion<T> {
    /// Delivers the result of the operation.
    pub fn complete(mut self, result: ProvResult<T>) {
        self.post(result);
    }

    /// Returns the registry index of the adapter this handle belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    fn post(&mut self, result: ProvResult<T>) {
        if let Some(events) = self.events.take() {
            // The receiver is gone only once the coordinator has shut down.
            let _ = events.send((self.wrap)(self.ticket, self.index, result));
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.post(Err(ProvError::Cancelled));
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("index", &self.index)
            .field("armed", &self.events.is_some())
            .finish()
    }
}

/// Capability set implemented once per middleware integration.
///
/// All methods are called from the coordinator's event loop. Long-running
/// work must be moved onto a spawned task and reported through the
/// completion handle.
pub trait Adapter: Send {
    /// Starts reading the backend's state for `context_id` (an IMSI-like
    /// discriminator, possibly empty).
    fn sync_in(&mut self, context_id: &str, done: SyncInCompletion) -> ProvResult<()>;

    /// Requests that an in-flight sync-in finish early with `Cancelled`.
    fn cancel_sync_in(&mut self);

    /// Starts reconciling the backend with `settings`, the session's final
    /// cache for this adapter.
    fn sync_out(&mut self, settings: Settings, done: SyncOutCompletion) -> ProvResult<()>;

    /// Requests that an in-flight sync-out finish early with `Cancelled`.
    fn cancel_sync_out(&mut self);

    /// Checks whether `key` may be set to `value`.
    fn validate_set(&self, key: &str, value: &str) -> ProvResult<()>;

    /// Checks whether `key` may be deleted and classifies it.
    fn validate_del(&self, key: &str) -> ProvResult<NodeKind>;

    /// Releases backend resources at process shutdown.
    fn destroy(&mut self) {}
}
