//! Live Client - reconnecting GraphQL subscription client
//!
//! Connects to a server-side subscription endpoint over a persistent
//! WebSocket, multiplexes queries, mutations and subscriptions over the
//! single connection, and normalizes every response into an in-memory
//! entity cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod transport;

pub use cache::{EntityKey, EntityWatch, InMemoryCache};
pub use client::{LiveClient, LiveClientBuilder, Subscription};
pub use config::{EndpointConfig, ReconnectConfig};
pub use error::{ClientError, ClientResult};
pub use link::{GraphqlLink, OperationStream};
pub use transport::{Connector, Transport, TransportError};

// Re-export shared types for convenience
pub use shared::{ExecutionResult, GraphqlError, Operation, OperationKind};
