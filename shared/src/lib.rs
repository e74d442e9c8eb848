//! Shared wire types for the live GraphQL client
//!
//! Message types exchanged between clients and the subscription endpoint,
//! used for both in-process (memory) and network (WebSocket) communication.

pub mod operation;
pub mod protocol;

// Re-exports (for convenient access)
pub use operation::{Operation, OperationKind};
pub use protocol::{
    ClientMessage, ExecutionResult, GraphqlError, OperationPayload, ServerMessage, SUBPROTOCOL,
};
