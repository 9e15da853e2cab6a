//! Broker process and client handles.

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, Request};
use crate::protocol::{Call, ClientId};
use provd_core::{event_channel, ProvError, ProvResult, Registry, Settings};
use provd_engine::{PluginManager, Reply};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A running broker.
///
/// The broker checks the registry, instantiates every adapter and spawns the
/// coordinator on the current tokio runtime. It stops on
/// [`BrokerHandle::shutdown`], on idle timeout, or once every handle and
/// client has been dropped.
///
/// # Example
///
/// ```no_run
/// use provd_core::Registry;
/// use provd_server::{Broker, ServerConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> provd_core::ProvResult<()> {
/// let broker = Broker::spawn(ServerConfig::default(), Arc::new(Registry::new()))?;
/// let client = broker.handle().connect();
/// client.start("").await?;
/// client.end().await?;
/// broker.handle().shutdown();
/// broker.wait().await
/// # }
/// ```
#[derive(Debug)]
pub struct Broker {
    handle: BrokerHandle,
    task: JoinHandle<()>,
}

impl Broker {
    /// Starts a broker hosting the adapters of `registry`.
    pub fn spawn(config: ServerConfig, registry: Arc<Registry>) -> ProvResult<Self> {
        let (events_tx, events_rx) = event_channel();
        let manager = PluginManager::new(registry, events_tx)?;

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(config, manager, events_rx, requests_rx);
        let task = tokio::spawn(coordinator.run());

        Ok(Self {
            handle: BrokerHandle {
                requests: requests_tx,
            },
            task,
        })
    }

    /// Returns a handle for connecting clients.
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Waits for the broker to stop.
    pub async fn wait(self) -> ProvResult<()> {
        let Broker { handle, task } = self;
        drop(handle);
        task.await
            .map_err(|e| ProvError::Corrupt(format!("coordinator task failed: {e}")))
    }

    /// Returns true once the coordinator has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Cloneable handle to a running broker.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl BrokerHandle {
    /// Connects a client with a freshly generated identity.
    pub fn connect(&self) -> Client {
        self.connect_as(ClientId::generate())
    }

    /// Connects a client with an identity supplied by a transport.
    pub fn connect_as(&self, id: ClientId) -> Client {
        Client {
            id,
            requests: self.requests.clone(),
        }
    }

    /// Asks the broker to stop, cancelling any sync in flight.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }

    /// Returns true if the broker has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// A connected client.
///
/// Dropping the client reports its disconnection; if it held the session,
/// the session ends as if `End` had been called.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    requests: mpsc::UnboundedSender<Request>,
}

impl Client {
    /// Returns the client's identity.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Issues a call and waits for its reply.
    pub async fn call(&self, call: Call) -> ProvResult<Reply> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Call {
                client: self.id.clone(),
                call,
                reply: tx,
            })
            .map_err(|_| ProvError::Cancelled)?;
        rx.await.map_err(|_| ProvError::Cancelled)?
    }

    /// Opens a session, waiting behind the current holder if there is one.
    pub async fn start(&self, context_id: &str) -> ProvResult<()> {
        self.call(Call::Start {
            context_id: context_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Closes the session.
    pub async fn end(&self) -> ProvResult<()> {
        self.call(Call::End).await.map(|_| ())
    }

    /// Reads one value.
    pub async fn get(&self, key: &str) -> ProvResult<String> {
        match self.call(Call::Get { key: key.to_string() }).await? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Reads every value at or below `key`.
    pub async fn get_all(&self, key: &str) -> ProvResult<Settings> {
        match self.call(Call::GetAll { key: key.to_string() }).await? {
            Reply::Settings(settings) => Ok(settings),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Writes one value.
    pub async fn set(&self, key: &str, value: &str) -> ProvResult<()> {
        self.call(Call::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Writes several values and returns the keys that failed.
    pub async fn set_all(&self, settings: Settings) -> ProvResult<Vec<String>> {
        match self.call(Call::SetAll { settings }).await? {
            Reply::FailedKeys(keys) => Ok(keys),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Removes a key or subtree.
    pub async fn delete(&self, key: &str) -> ProvResult<()> {
        self.call(Call::Delete { key: key.to_string() })
            .await
            .map(|_| ())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Disconnected {
            client: self.id.clone(),
        });
    }
}

fn unexpected_reply(reply: Reply) -> ProvError {
    ProvError::Corrupt(format!("unexpected reply {reply:?}"))
}
