//! Client façade combining link and cache
//!
//! [`LiveClient`] is what callers hold: it executes queries and mutations
//! (one terminal result each), opens subscriptions (cancellable streams),
//! and writes every result flowing through the link into the normalized
//! cache before delivering it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::cache::{EntityKey, EntityWatch, InMemoryCache};
use crate::config::{EndpointConfig, ReconnectConfig};
use crate::error::{ClientError, ClientResult};
use crate::link::{GraphqlLink, OperationStream};
use crate::transport::{Connector, WsConnector};
use shared::{ExecutionResult, Operation, OperationKind};

/// Reconnecting subscription client.
///
/// # Example
///
/// ```no_run
/// use live_client::{LiveClient, Operation};
/// # async fn example() -> Result<(), live_client::ClientError> {
/// let client = LiveClient::builder()
///     .endpoint("ws://localhost:8080/graphql-ws")
///     .build()?;
///
/// let result = client.query(Operation::query("{ status { load } }")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LiveClient {
    link: GraphqlLink,
    cache: Arc<InMemoryCache>,
    config: ReconnectConfig,
}

impl LiveClient {
    /// Creates a builder.
    pub fn builder() -> LiveClientBuilder {
        LiveClientBuilder::new()
    }

    /// Executes a query and returns its single result.
    ///
    /// The result's data is merged into the cache before it is returned.
    pub async fn query(&self, operation: Operation) -> ClientResult<ExecutionResult> {
        self.one_shot(operation, OperationKind::Query).await
    }

    /// Executes a mutation and returns its single result.
    pub async fn mutate(&self, operation: Operation) -> ClientResult<ExecutionResult> {
        self.one_shot(operation, OperationKind::Mutation).await
    }

    /// Opens a subscription.
    ///
    /// Every push is merged into the cache before being yielded. Dropping
    /// the handle (or calling [`Subscription::stop`]) unsubscribes.
    pub fn subscribe(&self, operation: Operation) -> ClientResult<Subscription> {
        if operation.kind != OperationKind::Subscription {
            return Err(ClientError::Config(format!(
                "subscribe expects a subscription operation, got {:?}",
                operation.kind
            )));
        }
        let stream = self.link.execute(&operation);
        Ok(Subscription {
            stream,
            cache: self.cache.clone(),
        })
    }

    /// The cache shared by every operation of this client.
    pub fn cache(&self) -> &Arc<InMemoryCache> {
        &self.cache
    }

    /// Cache-and-watch read: notifies whenever any operation's result
    /// updates the watched entity.
    pub fn watch_entity(&self, key: EntityKey) -> EntityWatch {
        self.cache.watch(key)
    }

    /// Terminates the connection and every live operation. Deterministic:
    /// the supervisor sends the terminate frame and stops retrying.
    pub fn shutdown(&self) {
        self.link.close();
    }

    async fn one_shot(
        &self,
        operation: Operation,
        kind: OperationKind,
    ) -> ClientResult<ExecutionResult> {
        if operation.kind != kind {
            return Err(ClientError::Config(format!(
                "expected a {:?} operation, got {:?}",
                kind, operation.kind
            )));
        }
        let mut stream = self.link.execute(&operation);

        let first = tokio::time::timeout(self.config.request_timeout, stream.next())
            .await
            .map_err(|_| ClientError::Timeout)?;

        match first {
            Some(Ok(result)) => {
                if let Some(data) = &result.data {
                    self.cache.merge(data);
                } else if result.has_errors() {
                    return Err(ClientError::Operation(result.errors));
                }
                Ok(result)
            }
            Some(Err(e)) => Err(e),
            None => Err(ClientError::EmptyResponse),
        }
    }
}

/// One active subscription.
///
/// A `Stream` of execution results; unbounded until stopped or dropped.
#[derive(Debug)]
pub struct Subscription {
    stream: OperationStream,
    cache: Arc<InMemoryCache>,
}

impl Subscription {
    /// Correlation id of the underlying operation.
    pub fn id(&self) -> &str {
        self.stream.id()
    }

    /// Unsubscribes. Idempotent; no further pushes are delivered.
    pub fn stop(&mut self) {
        self.stream.stop();
    }
}

impl Stream for Subscription {
    type Item = Result<ExecutionResult, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(result))) => {
                // Cache write happens before delivery
                if let Some(data) = &result.data {
                    this.cache.merge(data);
                }
                Poll::Ready(Some(Ok(result)))
            }
            other => other,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`LiveClient`].
///
/// # Example
///
/// ```no_run
/// use live_client::{EndpointConfig, LiveClient, ReconnectConfig};
///
/// let client = LiveClient::builder()
///     .endpoint_config(EndpointConfig::new("localhost:8080").secure(false))
///     .reconnect(ReconnectConfig::new().with_max_attempts(10))
///     .build()
///     .expect("failed to build client");
/// ```
#[derive(Debug, Default)]
pub struct LiveClientBuilder {
    endpoint: Option<String>,
    reconnect: Option<ReconnectConfig>,
    cache: Option<Arc<InMemoryCache>>,
    connector: Option<Arc<dyn Connector>>,
}

impl LiveClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            reconnect: None,
            cache: None,
            connector: None,
        }
    }

    /// Sets the endpoint URL (e.g. `ws://host/graphql-ws`).
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Sets the endpoint from a descriptor.
    pub fn endpoint_config(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = Some(endpoint.url());
        self
    }

    /// Sets the reconnect policy.
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Shares a caller-owned cache instead of creating a fresh one.
    pub fn cache(mut self, cache: Arc<InMemoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the WebSocket connector (in-process and test wiring).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the client.
    ///
    /// Never blocks: the connection is established by a background task.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if neither an endpoint nor a custom
    /// connector was provided.
    pub fn build(self) -> ClientResult<LiveClient> {
        let connector: Arc<dyn Connector> = match (self.connector, self.endpoint) {
            (Some(connector), _) => connector,
            (None, Some(url)) => Arc::new(WsConnector::new(url)),
            (None, None) => {
                return Err(ClientError::Config(
                    "endpoint or connector is required".into(),
                ));
            }
        };

        let config = self.reconnect.unwrap_or_default();
        let cache = self.cache.unwrap_or_else(|| Arc::new(InMemoryCache::new()));
        let link = GraphqlLink::open(connector, config.clone());

        Ok(LiveClient {
            link,
            cache,
            config,
        })
    }
}
