//! Serve command implementation.
//!
//! Requests arrive on stdin, one JSON object per line:
//!
//! ```text
//! {"id": 1, "client": ":1.7", "call": {"method": "Start", "context_id": ""}}
//! {"client": ":1.7", "call": {"method": "Disconnect"}}
//! ```
//!
//! and replies leave on stdout as `{"id": 1, "result": ...}` or
//! `{"id": 1, "error": "Unexpected"}`. Calls of one client are forwarded in
//! order, each after the previous one was answered.

use provd_core::{ErrorKind, ProvError, ProvResult, Registry};
use provd_server::{Broker, BrokerHandle, Call, ClientId, Reply, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    client: String,
    call: Value,
}

#[derive(Debug, PartialEq)]
enum Command {
    Call {
        id: Option<Value>,
        client: String,
        call: Call,
    },
    Disconnect {
        client: String,
    },
}

fn parse_line(line: &str) -> Result<Command, serde_json::Error> {
    let request: Request = serde_json::from_str(line)?;
    if request.call.get("method").and_then(Value::as_str) == Some("Disconnect") {
        return Ok(Command::Disconnect {
            client: request.client,
        });
    }
    Ok(Command::Call {
        id: request.id,
        client: request.client,
        call: serde_json::from_value(request.call)?,
    })
}

/// One line written to stdout.
#[derive(Debug, Serialize)]
struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorKind>,
}

impl Response {
    fn new(id: Option<Value>, result: ProvResult<Reply>) -> Self {
        match result {
            Ok(reply) => Self {
                id,
                result: Some(reply),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(e.kind()),
            },
        }
    }
}

struct Connection {
    calls: mpsc::UnboundedSender<(Option<Value>, Call)>,
    worker: JoinHandle<()>,
}

/// Clients seen on stdin, each served by its own worker task.
struct Connections {
    handle: BrokerHandle,
    clients: HashMap<String, Connection>,
    out: mpsc::UnboundedSender<Response>,
}

impl Connections {
    fn new(handle: BrokerHandle, out: mpsc::UnboundedSender<Response>) -> Self {
        Self {
            handle,
            clients: HashMap::new(),
            out,
        }
    }

    fn dispatch(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match parse_line(line) {
            Ok(Command::Call { id, client, call }) => {
                let connection = self
                    .clients
                    .entry(client.clone())
                    .or_insert_with(|| connect(&self.handle, &client, self.out.clone()));
                if connection.calls.send((id, call)).is_err() {
                    warn!(client = %client, "client worker has stopped");
                }
            }
            Ok(Command::Disconnect { client }) => {
                if let Some(connection) = self.clients.remove(&client) {
                    debug!(client = %client, "client disconnected");
                    connection.worker.abort();
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed request");
                let _ = self
                    .out
                    .send(Response::new(None, Err(ProvError::BadArgs(e.to_string()))));
            }
        }
    }

    fn disconnect_all(&mut self) {
        for (client, connection) in self.clients.drain() {
            debug!(client = %client, "client disconnected");
            connection.worker.abort();
        }
    }
}

fn connect(handle: &BrokerHandle, name: &str, out: mpsc::UnboundedSender<Response>) -> Connection {
    let client = handle.connect_as(ClientId::new(name));
    let (calls, mut queue) = mpsc::unbounded_channel::<(Option<Value>, Call)>();
    let worker = tokio::spawn(async move {
        while let Some((id, call)) = queue.recv().await {
            let result = client.call(call).await;
            if out.send(Response::new(id, result)).is_err() {
                break;
            }
        }
    });
    Connection { calls, worker }
}

async fn write_responses<W>(mut responses: mpsc::UnboundedReceiver<Response>, mut output: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        let mut line = match serde_json::to_vec(&response) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "unable to encode reply");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = output.write_all(&line).await {
            warn!(error = %e, "unable to write reply");
            break;
        }
        let _ = output.flush().await;
    }
}

/// Reads `input` line by line on a dedicated thread.
///
/// A blocked read never holds up the runtime: once the broker stops, the
/// process exits whether or not the peer has closed its end.
fn read_lines<R>(input: R) -> std::io::Result<mpsc::UnboundedReceiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("provd-input".into())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "unable to listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Runs the serve command on stdin and stdout until the broker stops.
pub async fn run(config: ServerConfig, registry: Registry) -> Result<(), Box<dyn std::error::Error>> {
    config.ensure_data_dir()?;
    let input = read_lines(std::io::BufReader::new(std::io::stdin()))?;
    serve(config, registry, input, tokio::io::stdout(), shutdown_signal()).await
}

async fn serve<W, S>(
    config: ServerConfig,
    registry: Registry,
    mut input: mpsc::UnboundedReceiver<std::io::Result<String>>,
    output: W,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    info!(
        instance = config.instance.name(),
        data_dir = %config.data_dir.display(),
        "starting broker"
    );

    let broker = Broker::spawn(config, Arc::new(registry))?;
    let handle = broker.handle();
    let finished = broker.wait();
    tokio::pin!(finished);
    tokio::pin!(shutdown);

    let (out, responses) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(responses, output));
    let mut connections = Connections::new(handle.clone(), out);
    let mut input_open = true;
    let mut signalled = false;

    let result = loop {
        tokio::select! {
            result = &mut finished => break result,
            _ = &mut shutdown, if !signalled => {
                info!("shutdown requested");
                signalled = true;
                handle.shutdown();
            }
            line = input.recv(), if input_open => match line {
                Some(Ok(line)) => connections.dispatch(&line),
                Some(Err(e)) => {
                    warn!(error = %e, "unable to read input");
                    input_open = false;
                    connections.disconnect_all();
                }
                None => {
                    info!("input closed");
                    input_open = false;
                    connections.disconnect_all();
                }
            },
        }
    };

    drop(connections);
    let _ = writer.await;
    result?;
    info!("broker stopped");
    Ok(())
}
