//! Memory transport implementation (for in-process communication)

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{Connector, Transport, TransportError};
use shared::{ClientMessage, ServerMessage};

/// In-process transport over unbounded channels.
///
/// Created in pairs: the client half implements [`Transport`], the
/// [`MemoryServerEnd`] plays the server side. Dropping the server end is
/// equivalent to the peer closing the socket.
#[derive(Debug)]
pub struct MemoryTransport {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ServerMessage>>>,
    tx: mpsc::UnboundedSender<ClientMessage>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Creates a connected transport/server-end pair.
    pub fn pair() -> (Self, MemoryServerEnd) {
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Arc::new(Mutex::new(client_rx)),
                tx: client_tx,
                closed: AtomicBool::new(false),
            },
            MemoryServerEnd {
                tx: server_tx,
                rx: server_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&self) -> Result<ServerMessage, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(msg.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Server side of a [`MemoryTransport`] pair.
#[derive(Debug)]
pub struct MemoryServerEnd {
    tx: mpsc::UnboundedSender<ServerMessage>,
    rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MemoryServerEnd {
    /// Pushes a message to the client. Returns false if the client is gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Receives the next message from the client.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.rx.recv().await
    }

    /// Drops both directions, simulating a connection drop.
    pub fn disconnect(self) {}
}

/// Connector serving a scripted queue of transports, one per connection
/// epoch. Once the queue is empty every further attempt fails, which is
/// how tests model an unreachable endpoint.
#[derive(Debug)]
pub struct MemoryConnector {
    transports: Mutex<VecDeque<MemoryTransport>>,
}

impl MemoryConnector {
    pub fn new(transports: impl IntoIterator<Item = MemoryTransport>) -> Self {
        Self {
            transports: Mutex::new(transports.into_iter().collect()),
        }
    }

    /// Connector that refuses every connection attempt.
    pub fn unreachable() -> Self {
        Self::new([])
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut queue = self.transports.lock().await;
        match queue.pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::Connection(
                "connection refused".to_string(),
            )),
        }
    }
}
