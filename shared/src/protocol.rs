//! Subscription wire protocol message types
//!
//! These types mirror the subscription-over-socket protocol spoken by the
//! server: a connection handshake followed by per-operation start / data /
//! error / complete / stop messages, multiplexed over one connection and
//! correlated by operation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// WebSocket subprotocol offered during the upgrade handshake.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the logical connection after the socket is established.
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Starts an operation under the given correlation id.
    Start { id: String, payload: OperationPayload },
    /// Cancels a running operation.
    Stop { id: String },
    /// Terminates the logical connection.
    ConnectionTerminate,
}

/// Messages sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The server accepted the connection handshake.
    ConnectionAck,
    /// The server rejected the connection handshake.
    ConnectionError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Periodic keep-alive.
    #[serde(rename = "ka")]
    KeepAlive,
    /// One result for the operation identified by `id`.
    Data { id: String, payload: ExecutionResult },
    /// Terminal error for the operation identified by `id`.
    Error { id: String, payload: Value },
    /// The operation identified by `id` finished normally.
    Complete { id: String },
}

impl ServerMessage {
    /// Correlation id this message belongs to, if it is operation-scoped.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Data { id, .. }
            | ServerMessage::Error { id, .. }
            | ServerMessage::Complete { id } => Some(id),
            _ => None,
        }
    }
}

/// The operation body carried by a `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    pub query: String,
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

/// One execution result delivered by a `data` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl ExecutionResult {
    /// Result carrying only data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// True if the server reported any field-level errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A single GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct GraphqlError {
    pub message: String,
    /// Locations, path, extensions, carried through untouched.
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }
}
