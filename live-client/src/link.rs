//! Operation link over a single shared connection
//!
//! [`GraphqlLink`] multiplexes many logical operations over one transport
//! connection. Each operation gets a correlation id; incoming `data` /
//! `error` / `complete` messages are routed back to the originating
//! [`OperationStream`] through a routing table.
//!
//! A background supervisor task owns the connection. When the transport
//! drops it reconnects with exponential backoff, re-issues `start` for
//! every live subscription, and fails in-flight one-shot operations
//! (queries and mutations are never re-sent; they may not be idempotent).

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ReconnectConfig;
use crate::error::ClientError;
use crate::transport::{Connector, Transport, TransportError};
use shared::protocol::OperationPayload;
use shared::{ClientMessage, ExecutionResult, GraphqlError, Operation, ServerMessage};

/// Event delivered to one operation's stream.
#[derive(Debug)]
enum LinkEvent {
    Next(ExecutionResult),
    Failed(ClientError),
    Completed,
}

/// Routing-table entry for one live operation.
#[derive(Debug)]
struct Route {
    events: mpsc::UnboundedSender<LinkEvent>,
    /// Present for subscriptions; used to re-issue `start` after reconnect.
    payload: Option<OperationPayload>,
}

/// Executes logical operations over one shared, supervised connection.
#[derive(Debug, Clone)]
pub struct GraphqlLink {
    commands: mpsc::UnboundedSender<ClientMessage>,
    routes: Arc<DashMap<String, Route>>,
    shutdown: CancellationToken,
}

impl GraphqlLink {
    /// Spawns the connection supervisor and returns immediately.
    ///
    /// The connection itself is established in the background; operations
    /// issued before it is up are queued and sent once the handshake
    /// completes.
    pub fn open(connector: Arc<dyn Connector>, config: ReconnectConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let routes: Arc<DashMap<String, Route>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(run_supervisor(
            connector,
            config,
            command_rx,
            routes.clone(),
            shutdown.clone(),
        ));

        Self {
            commands: command_tx,
            routes,
            shutdown,
        }
    }

    /// Starts an operation and returns its lazy result sequence.
    ///
    /// Queries and mutations terminate after one result; subscriptions run
    /// until stopped or the stream is dropped.
    pub fn execute(&self, operation: &Operation) -> OperationStream {
        let id = Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let payload = operation.payload();

        self.routes.insert(
            id.clone(),
            Route {
                events: event_tx.clone(),
                payload: (!operation.kind.is_one_shot()).then(|| payload.clone()),
            },
        );

        let start = ClientMessage::Start {
            id: id.clone(),
            payload,
        };
        if self.commands.send(start).is_err() {
            // Supervisor already gone: fail the operation immediately
            self.routes.remove(&id);
            let _ = event_tx.send(LinkEvent::Failed(ClientError::ConnectionClosed(
                "client is shut down".to_string(),
            )));
        }

        OperationStream {
            id,
            events: event_rx,
            commands: self.commands.clone(),
            routes: self.routes.clone(),
            done: false,
        }
    }

    /// Number of live operations.
    pub fn active_operations(&self) -> usize {
        self.routes.len()
    }

    /// Terminates the connection and every live operation.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Lazy sequence of results for one operation.
///
/// Dropping the stream (or calling [`stop`](Self::stop)) unregisters the
/// operation and sends `stop` to the server; disposal is idempotent and no
/// further results are delivered afterwards.
#[derive(Debug)]
pub struct OperationStream {
    id: String,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::UnboundedSender<ClientMessage>,
    routes: Arc<DashMap<String, Route>>,
    done: bool,
}

impl OperationStream {
    /// Correlation id of this operation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancels the operation. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.routes.remove(&self.id).is_some() {
            let _ = self.commands.send(ClientMessage::Stop {
                id: self.id.clone(),
            });
        }
        self.done = true;
        self.events.close();
    }
}

impl Stream for OperationStream {
    type Item = Result<ExecutionResult, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(LinkEvent::Next(result))) => Poll::Ready(Some(Ok(result))),
            Poll::Ready(Some(LinkEvent::Failed(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(LinkEvent::Completed)) | Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OperationStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Connection supervisor
// ============================================================================

async fn run_supervisor(
    connector: Arc<dyn Connector>,
    config: ReconnectConfig,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    routes: Arc<DashMap<String, Route>>,
    shutdown: CancellationToken,
) {
    // Ids whose `start` has been written to some transport. Subscriptions
    // in this set are re-issued after a reconnect; one-shots in this set
    // are failed when the connection drops.
    let mut sent: HashSet<String> = HashSet::new();
    // Command that could not be written before the connection dropped;
    // retried first on the next epoch.
    let mut leftover: Option<ClientMessage> = None;
    let mut attempt: u32 = 0;

    loop {
        // --- establish a connection epoch ---
        let transport = loop {
            if shutdown.is_cancelled() {
                complete_all(&routes);
                return;
            }
            match establish(connector.as_ref(), &config).await {
                Ok(transport) => break transport,
                Err(e) => {
                    attempt += 1;
                    if !config.enabled || config.exhausted(attempt) {
                        tracing::warn!(attempt, "giving up on connection: {}", e);
                        fail_all(&routes, &format!("connect failed: {}", e));
                        return;
                    }
                    let delay = config.delay_for(attempt);
                    tracing::info!(attempt, ?delay, "connect failed, retrying: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            complete_all(&routes);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };
        attempt = 0;
        tracing::info!("connection established");

        // Re-issue `start` for subscriptions that were live on the
        // previous epoch, then flush any half-sent command.
        let mut epoch_ok = true;
        let resume: Vec<(String, OperationPayload)> = routes
            .iter()
            .filter(|entry| sent.contains(entry.key()))
            .filter_map(|entry| {
                entry
                    .value()
                    .payload
                    .clone()
                    .map(|payload| (entry.key().clone(), payload))
            })
            .collect();
        for (id, payload) in resume {
            tracing::debug!(%id, "re-registering subscription");
            if let Err(e) = transport.send(&ClientMessage::Start { id, payload }).await {
                tracing::warn!("connection lost during re-registration: {}", e);
                epoch_ok = false;
                break;
            }
        }
        if epoch_ok {
            if let Some(msg) = leftover.take() {
                match transport.send(&msg).await {
                    Ok(()) => track_sent(&msg, &mut sent),
                    Err(e) => {
                        tracing::warn!("connection lost flushing queued command: {}", e);
                        leftover = Some(msg);
                        epoch_ok = false;
                    }
                }
            }
        }

        // --- epoch loop ---
        while epoch_ok {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = transport.send(&ClientMessage::ConnectionTerminate).await;
                    let _ = transport.close().await;
                    complete_all(&routes);
                    tracing::info!("connection terminated");
                    return;
                }
                cmd = commands.recv() => match cmd {
                    Some(msg) => match transport.send(&msg).await {
                        Ok(()) => track_sent(&msg, &mut sent),
                        Err(e) => {
                            tracing::warn!("connection lost while sending: {}", e);
                            leftover = Some(msg);
                            epoch_ok = false;
                        }
                    },
                    // Link handle dropped: tear down like an explicit close
                    None => {
                        let _ = transport.send(&ClientMessage::ConnectionTerminate).await;
                        let _ = transport.close().await;
                        complete_all(&routes);
                        return;
                    }
                },
                msg = transport.recv() => match msg {
                    Ok(msg) => dispatch(&routes, &mut sent, msg),
                    Err(e) => {
                        tracing::warn!("connection dropped: {}", e);
                        epoch_ok = false;
                    }
                }
            }
        }

        // Epoch ended: fail one-shot operations that were already on the
        // wire (their response is lost and re-sending is not safe) and
        // forget routes that disappeared in the meantime.
        let in_flight: Vec<String> = sent
            .iter()
            .filter(|id| {
                routes
                    .get(id.as_str())
                    .map(|route| route.payload.is_none())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in in_flight {
            if let Some((_, route)) = routes.remove(&id) {
                let _ = route.events.send(LinkEvent::Failed(ClientError::ConnectionLost));
            }
            sent.remove(&id);
        }
        sent.retain(|id| routes.contains_key(id));

        if !config.enabled {
            fail_all(&routes, "connection dropped and reconnect is disabled");
            return;
        }
    }
}

/// Opens a transport and performs the connection handshake.
async fn establish(
    connector: &dyn Connector,
    config: &ReconnectConfig,
) -> Result<Box<dyn Transport>, TransportError> {
    let transport = connector.connect().await?;
    transport
        .send(&ClientMessage::ConnectionInit { payload: None })
        .await?;

    let ack = tokio::time::timeout(config.handshake_timeout, async {
        loop {
            match transport.recv().await? {
                ServerMessage::ConnectionAck => return Ok(()),
                ServerMessage::KeepAlive => continue,
                ServerMessage::ConnectionError { payload } => {
                    return Err(TransportError::Connection(format!(
                        "handshake rejected: {}",
                        payload.unwrap_or_default()
                    )));
                }
                other => {
                    tracing::debug!("ignoring pre-ack message: {:?}", other);
                }
            }
        }
    })
    .await;

    match ack {
        Ok(Ok(())) => Ok(transport),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::Connection(
            "handshake timed out".to_string(),
        )),
    }
}

/// Routes one server message to the operation it belongs to.
fn dispatch(routes: &DashMap<String, Route>, sent: &mut HashSet<String>, msg: ServerMessage) {
    match msg {
        ServerMessage::Data { id, payload } => match routes.get(&id) {
            Some(route) => {
                let _ = route.events.send(LinkEvent::Next(payload));
            }
            // Late result racing a disposed handle; disposal wins
            None => tracing::debug!(%id, "dropping result for unknown operation"),
        },
        ServerMessage::Error { id, payload } => {
            if let Some((_, route)) = routes.remove(&id) {
                let errors = parse_error_payload(payload);
                let _ = route.events.send(LinkEvent::Failed(ClientError::Operation(errors)));
            }
            sent.remove(&id);
        }
        ServerMessage::Complete { id } => {
            if let Some((_, route)) = routes.remove(&id) {
                let _ = route.events.send(LinkEvent::Completed);
            }
            sent.remove(&id);
        }
        ServerMessage::KeepAlive => {}
        other => tracing::debug!("ignoring message: {:?}", other),
    }
}

fn track_sent(msg: &ClientMessage, sent: &mut HashSet<String>) {
    match msg {
        ClientMessage::Start { id, .. } => {
            sent.insert(id.clone());
        }
        ClientMessage::Stop { id } => {
            sent.remove(id);
        }
        _ => {}
    }
}

/// The server may send a single error object or an array of them.
fn parse_error_payload(payload: serde_json::Value) -> Vec<GraphqlError> {
    if payload.is_array() {
        if let Ok(errors) = serde_json::from_value(payload.clone()) {
            return errors;
        }
    }
    if let Ok(error) = serde_json::from_value::<GraphqlError>(payload.clone()) {
        return vec![error];
    }
    vec![GraphqlError::new(payload.to_string())]
}

fn fail_all(routes: &DashMap<String, Route>, reason: &str) {
    for entry in routes.iter() {
        let _ = entry.value().events.send(LinkEvent::Failed(
            ClientError::ConnectionClosed(reason.to_string()),
        ));
    }
    routes.clear();
}

fn complete_all(routes: &DashMap<String, Route>) {
    for entry in routes.iter() {
        let _ = entry.value().events.send(LinkEvent::Completed);
    }
    routes.clear();
}
