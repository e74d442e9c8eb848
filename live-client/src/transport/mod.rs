//! Transport abstraction for the subscription socket
//!
//! A [`Transport`] is one established connection carrying framed protocol
//! messages. A [`Connector`] opens transports on demand; the connection
//! supervisor calls it once per connection epoch, which is what makes
//! reconnection possible without the upper layers noticing.

use async_trait::async_trait;
use thiserror::Error;

use shared::{ClientMessage, ServerMessage};

mod memory;
mod ws;

pub use memory::{MemoryConnector, MemoryServerEnd, MemoryTransport};
pub use ws::{WsConnector, WsTransport};

/// Transport-level error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish or use the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer sent a frame we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection was closed
    #[error("Connection closed")]
    Closed,
}

/// One established connection carrying protocol messages.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn recv(&self) -> Result<ServerMessage, TransportError>;
    async fn send(&self, msg: &ClientMessage) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory opening a fresh [`Transport`] per connection epoch.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}
