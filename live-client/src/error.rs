//! Client error types

use thiserror::Error;

use crate::transport::TransportError;
use shared::GraphqlError;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure that could not be recovered
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection dropped while the operation was in flight
    #[error("Connection lost while operation was in flight")]
    ConnectionLost,

    /// Reconnect attempts were exhausted (or reconnect is disabled)
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The server returned a terminal error for this operation
    #[error("Operation failed: {}", format_errors(.0))]
    Operation(Vec<GraphqlError>),

    /// The operation finished without producing a result
    #[error("Operation completed without a result")]
    EmptyResponse,

    /// The operation did not produce a result in time
    #[error("Operation timed out")]
    Timeout,

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

fn format_errors(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
