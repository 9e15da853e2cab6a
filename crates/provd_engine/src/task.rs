//! Task pipeline.
//!
//! Every call that reaches the plugin manager is wrapped in a [`Task`] and
//! executed in arrival order. Cache operations complete within the same turn.
//! Sync-in and sync-out suspend the queue until the manager reports
//! [`provd_core::EngineEvent::Finished`].

use crate::manager::PluginManager;
use provd_core::{ProvError, ProvResult, Settings};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// Work carried by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Populate the caches for a new session.
    SyncIn {
        /// IMSI-like discriminator, possibly empty.
        context_id: String,
    },
    /// Flush the caches at session end.
    SyncOut,
    /// Read one value.
    Get {
        /// Key to read.
        key: String,
    },
    /// Read a subtree.
    GetAll {
        /// Prefix to read below.
        prefix: String,
    },
    /// Write one value.
    Set {
        /// Key to write.
        key: String,
        /// New value.
        value: String,
    },
    /// Write several values.
    SetAll {
        /// Values to write.
        settings: Settings,
    },
    /// Remove a key or subtree.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl TaskKind {
    /// Returns true for the kinds that suspend the queue.
    pub fn is_async(&self) -> bool {
        matches!(self, TaskKind::SyncIn { .. } | TaskKind::SyncOut)
    }

    fn name(&self) -> &'static str {
        match self {
            TaskKind::SyncIn { .. } => "SyncIn",
            TaskKind::SyncOut => "SyncOut",
            TaskKind::Get { .. } => "Get",
            TaskKind::GetAll { .. } => "GetAll",
            TaskKind::Set { .. } => "Set",
            TaskKind::SetAll { .. } => "SetAll",
            TaskKind::Delete { .. } => "Delete",
        }
    }
}

/// Successful result of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Reply {
    /// The call has no output.
    Unit,
    /// A single value (`Get`).
    Value(String),
    /// A settings map (`GetAll`).
    Settings(Settings),
    /// Keys that could not be set (`SetAll`).
    FailedKeys(Vec<String>),
}

/// Sender through which a task's reply is delivered.
pub type TaskReply = oneshot::Sender<ProvResult<Reply>>;

/// Outcome of executing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task replied and can be discarded.
    Completed,
    /// The task is waiting for the manager to finish a sync pass.
    Suspended,
}

/// A queued unit of work bound to its deferred reply.
#[derive(Debug)]
pub struct Task {
    kind: TaskKind,
    reply: Option<TaskReply>,
}

impl Task {
    /// Creates a task answering through `reply`.
    pub fn new(kind: TaskKind, reply: TaskReply) -> Self {
        Self {
            kind,
            reply: Some(reply),
        }
    }

    /// Creates a task nobody waits on, such as a session's sync-in.
    pub fn internal(kind: TaskKind) -> Self {
        Self { kind, reply: None }
    }

    /// Returns the work carried by the task.
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Runs the task against `manager`.
    pub fn execute(&mut self, manager: &mut PluginManager) -> TaskOutcome {
        debug!(task = self.kind.name(), "processing task");

        let result = match &self.kind {
            TaskKind::SyncIn { context_id } => match manager.sync_in(context_id) {
                Ok(()) => return TaskOutcome::Suspended,
                Err(e) => Err(e),
            },
            TaskKind::SyncOut => match manager.sync_out() {
                Ok(()) => return TaskOutcome::Suspended,
                Err(e) => Err(e),
            },
            TaskKind::Get { key } => manager.get(key).map(Reply::Value),
            TaskKind::GetAll { prefix } => manager.get_all(prefix).map(Reply::Settings),
            TaskKind::Set { key, value } => manager.set(key, value).map(|()| Reply::Unit),
            TaskKind::SetAll { settings } => manager.set_all(settings).map(Reply::FailedKeys),
            TaskKind::Delete { key } => manager.delete(key).map(|()| Reply::Unit),
        };

        self.finish(result);
        TaskOutcome::Completed
    }

    /// Delivers the task's result, if anyone is waiting for it.
    pub fn finish(&mut self, result: ProvResult<Reply>) {
        if let Err(e) = &result {
            debug!(task = self.kind.name(), error = %e, "task failed");
        }
        if let Some(reply) = self.reply.take() {
            // The caller may have gone away; nothing to report then.
            let _ = reply.send(result);
        }
    }

    /// Answers the task with `Cancelled` without running it.
    pub fn cancel(mut self) {
        self.finish(Err(ProvError::Cancelled));
    }
}
