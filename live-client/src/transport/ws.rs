//! WebSocket transport implementation

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Connector, Transport, TransportError};
use shared::{ClientMessage, ServerMessage, SUBPROTOCOL};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport speaking JSON text frames.
#[derive(Debug)]
pub struct WsTransport {
    writer: Arc<Mutex<SplitSink<WsStream, Message>>>,
    reader: Arc<Mutex<SplitStream<WsStream>>>,
}

impl WsTransport {
    /// Opens a WebSocket to `url`, offering the subscription subprotocol.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connection(format!("Invalid endpoint URL: {}", e)))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );

        let (stream, _response) = connect_async(request).await?;
        let (writer, reader) = stream.split();

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&self) -> Result<ServerMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).map_err(|e| {
                        TransportError::Protocol(format!("Malformed server message: {}", e))
                    });
                }
                // Control and binary frames are not part of the protocol
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e)),
            }
        }
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)
            .map_err(|e| TransportError::Protocol(format!("Failed to encode message: {}", e)))?;
        let mut writer = self.writer.lock().await;
        writer.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.close().await?;
        Ok(())
    }
}

/// Connector opening [`WsTransport`]s to a fixed endpoint URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = WsTransport::connect(&self.url).await?;
        Ok(Box::new(transport))
    }
}
