//! Session coordinator.
//!
//! The coordinator is a single task owning the plugin manager, the session
//! holder, the queue of waiting clients and the task queue. It reacts to
//! three sources: client requests, engine events, and the idle timer.

use crate::config::ServerConfig;
use crate::protocol::{Call, ClientId};
use provd_core::{EngineEvent, EventReceiver, ProvError};
use provd_engine::{PluginManager, Reply, Task, TaskKind, TaskOutcome, TaskReply};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Messages sent to the coordinator by client handles.
#[derive(Debug)]
pub(crate) enum Request {
    /// A call from a client.
    Call {
        client: ClientId,
        call: Call,
        reply: TaskReply,
    },
    /// A client went away.
    Disconnected { client: ClientId },
    /// Stop the broker.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    /// End was received; waiting for sync-out to complete.
    Ending,
}

#[derive(Debug)]
struct Session {
    client: ClientId,
    phase: Phase,
}

#[derive(Debug)]
struct Waiter {
    client: ClientId,
    context_id: String,
    reply: TaskReply,
}

enum Next {
    Request(Option<Request>),
    Event(EngineEvent),
    IdleTimeout,
}

pub(crate) struct Coordinator {
    config: ServerConfig,
    manager: PluginManager,
    events: EventReceiver,
    requests: mpsc::UnboundedReceiver<Request>,
    holder: Option<Session>,
    waiting: VecDeque<Waiter>,
    tasks: VecDeque<Task>,
    in_flight: Option<Task>,
    requests_open: bool,
    quitting: bool,
}

impl Coordinator {
    pub(crate) fn new(
        config: ServerConfig,
        manager: PluginManager,
        events: EventReceiver,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        Self {
            config,
            manager,
            events,
            requests,
            holder: None,
            waiting: VecDeque::new(),
            tasks: VecDeque::new(),
            in_flight: None,
            requests_open: true,
            quitting: false,
        }
    }

    /// Runs until shutdown or idle timeout.
    pub(crate) async fn run(mut self) {
        info!(
            instance = self.config.instance.name(),
            bus_name = %self.config.bus_name,
            adapters = self.manager.registry().len(),
            "coordinator started"
        );

        let idle_timer = tokio::time::sleep(self.config.idle_timeout);
        tokio::pin!(idle_timer);
        let mut armed = false;

        while !(self.quitting && self.in_flight.is_none()) {
            // the countdown restarts on requests, never on engine events
            let idle = self.is_idle();
            if idle && !armed {
                idle_timer
                    .as_mut()
                    .reset(Instant::now() + self.config.idle_timeout);
            }
            armed = idle;

            let next = tokio::select! {
                Some(event) = self.events.recv() => Next::Event(event),
                request = self.requests.recv(), if self.requests_open => Next::Request(request),
                () = &mut idle_timer, if idle => Next::IdleTimeout,
            };

            match next {
                Next::Event(event) => self.on_event(event),
                Next::Request(Some(request)) => {
                    armed = false;
                    self.on_request(request);
                }
                Next::Request(None) => {
                    debug!("all handles dropped");
                    self.requests_open = false;
                    self.begin_shutdown();
                }
                Next::IdleTimeout => {
                    info!(timeout = ?self.config.idle_timeout, "idle timeout");
                    break;
                }
            }

            self.process_tasks();
        }

        self.reject_remaining();
        info!("coordinator stopped");
    }

    fn is_idle(&self) -> bool {
        self.holder.is_none()
            && self.waiting.is_empty()
            && self.tasks.is_empty()
            && self.in_flight.is_none()
            && !self.quitting
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Call { client, call, reply } => {
                if self.quitting {
                    let _ = reply.send(Err(ProvError::Cancelled));
                    return;
                }
                debug!(client = %client, method = call.method(), "call");
                match call {
                    Call::Start { context_id } => self.start(client, context_id, reply),
                    Call::End => self.end(client, reply),
                    other => self.session_call(client, other, reply),
                }
            }
            Request::Disconnected { client } => self.lost_client(client),
            Request::Shutdown => self.begin_shutdown(),
        }
    }

    fn start(&mut self, client: ClientId, context_id: String, reply: TaskReply) {
        if self.holder.is_none() {
            info!(client = %client, context_id = %context_id, "session started");
            self.holder = Some(Session {
                client,
                phase: Phase::Active,
            });
            self.tasks
                .push_back(Task::internal(TaskKind::SyncIn { context_id }));
            let _ = reply.send(Ok(Reply::Unit));
        } else if self.is_active_holder(&client) || self.is_waiting(&client) {
            warn!(client = %client, "start called twice");
            let _ = reply.send(Err(ProvError::Unexpected));
        } else {
            info!(client = %client, waiting = self.waiting.len() + 1, "client queued");
            self.waiting.push_back(Waiter {
                client,
                context_id,
                reply,
            });
        }
    }

    fn end(&mut self, client: ClientId, reply: TaskReply) {
        if self.is_active_holder(&client) {
            let _ = reply.send(Ok(Reply::Unit));
            self.end_session();
        } else {
            warn!(client = %client, "end called before start");
            let _ = reply.send(Err(ProvError::Unexpected));
        }
    }

    fn session_call(&mut self, client: ClientId, call: Call, reply: TaskReply) {
        if !self.is_active_holder(&client) {
            warn!(client = %client, method = call.method(), "called before start");
            let _ = reply.send(Err(ProvError::Unexpected));
            return;
        }

        let kind = match call {
            Call::Get { key } => TaskKind::Get { key },
            Call::GetAll { key } => TaskKind::GetAll { prefix: key },
            Call::Set { key, value } => TaskKind::Set { key, value },
            Call::SetAll { settings } => TaskKind::SetAll { settings },
            Call::Delete { key } => TaskKind::Delete { key },
            Call::Start { .. } | Call::End => {
                let _ = reply.send(Err(ProvError::Unexpected));
                return;
            }
        };
        self.tasks.push_back(Task::new(kind, reply));
    }

    fn end_session(&mut self) {
        if let Some(session) = self.holder.as_mut() {
            info!(client = %session.client, "session ending");
            session.phase = Phase::Ending;
            self.tasks.push_back(Task::internal(TaskKind::SyncOut));
        }
    }

    fn lost_client(&mut self, client: ClientId) {
        if self.is_active_holder(&client) {
            info!(client = %client, "session holder lost");
            self.end_session();
        } else if let Some(pos) = self.waiting.iter().position(|w| w.client == client) {
            info!(client = %client, "queued client lost");
            self.waiting.remove(pos);
        }
    }

    fn session_ended(&mut self) {
        if let Some(session) = self.holder.take() {
            info!(client = %session.client, "session ended");
        }
        if self.quitting {
            return;
        }

        while let Some(next) = self.waiting.pop_front() {
            if next.reply.is_closed() {
                debug!(client = %next.client, "queued start abandoned");
                continue;
            }
            info!(client = %next.client, "queued client promoted");
            self.holder = Some(Session {
                client: next.client,
                phase: Phase::Active,
            });
            self.tasks.push_back(Task::internal(TaskKind::SyncIn {
                context_id: next.context_id,
            }));
            let _ = next.reply.send(Ok(Reply::Unit));
            break;
        }
    }

    fn process_tasks(&mut self) {
        while self.in_flight.is_none() && !self.quitting {
            let Some(mut task) = self.tasks.pop_front() else {
                break;
            };
            let is_sync_out = matches!(task.kind(), TaskKind::SyncOut);

            match task.execute(&mut self.manager) {
                TaskOutcome::Suspended => self.in_flight = Some(task),
                TaskOutcome::Completed if is_sync_out => self.session_ended(),
                TaskOutcome::Completed => {}
            }
        }
    }

    fn on_event(&mut self, event: EngineEvent) {
        let Some(result) = self.manager.handle_event(event) else {
            return;
        };
        let Some(mut task) = self.in_flight.take() else {
            warn!("sync finished with no task in flight");
            return;
        };

        let is_sync_out = matches!(task.kind(), TaskKind::SyncOut);
        match &result {
            Ok(()) => info!(sync_out = is_sync_out, "sync finished"),
            Err(e) => warn!(sync_out = is_sync_out, error = %e, "sync finished with error"),
        }
        task.finish(result.map(|()| Reply::Unit));

        if is_sync_out {
            self.session_ended();
        }
    }

    fn begin_shutdown(&mut self) {
        if self.quitting {
            return;
        }
        info!("shutting down");
        self.quitting = true;

        if self.in_flight.is_some() && !self.manager.cancel() {
            if let Some(task) = self.in_flight.take() {
                task.cancel();
            }
        }
    }

    fn reject_remaining(&mut self) {
        for task in self.tasks.drain(..) {
            task.cancel();
        }
        for waiter in self.waiting.drain(..) {
            debug!(client = %waiter.client, "rejecting queued client");
            let _ = waiter.reply.send(Err(ProvError::Cancelled));
        }
    }

    fn is_active_holder(&self, client: &ClientId) -> bool {
        matches!(&self.holder, Some(s) if s.client == *client && s.phase == Phase::Active)
    }

    fn is_waiting(&self, client: &ClientId) -> bool {
        self.waiting.iter().any(|w| w.client == *client)
    }
}
