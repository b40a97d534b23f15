//! Transport capability and the WebSocket implementation
//!
//! The socket core only sees the three traits below: a [`Connector`] that
//! opens transports, and the sink/stream halves of an established
//! connection. [`WsConnector`] implements the capability over
//! tokio-tungstenite; tests inject their own connector instead.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{Result, SocketError};

/// Write half of an established transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Send one binary payload.
    async fn send(&mut self, data: Bytes) -> Result<()>;

    /// Close the transport. Best-effort.
    async fn close(&mut self);

    /// Current readiness. False once the connection is known dead.
    fn is_open(&self) -> bool;
}

/// Read half of an established transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Next inbound payload. `Ok(None)` means the peer closed.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// Opens transport connections for the reliable socket.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// WebSocket connector backed by tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)> {
        debug!(url = %url, "Connecting to WebSocket");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Origin", "http://localhost")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| SocketError::Handshake(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| SocketError::Handshake(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok((
            Box::new(WsTransportSink { sink, open: true }),
            Box::new(WsTransportStream { stream }),
        ))
    }
}

struct WsTransportSink {
    sink: WsSink,
    open: bool,
}

#[async_trait]
impl TransportSink for WsTransportSink {
    async fn send(&mut self, data: Bytes) -> Result<()> {
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| {
                self.open = false;
                SocketError::Transport(format!("Failed to send: {}", e))
            })
    }

    async fn close(&mut self) {
        self.open = false;
        let _ = self.sink.close().await;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct WsTransportStream {
    stream: WsStream,
}

#[async_trait]
impl TransportStream for WsTransportStream {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                // An echo peer may answer in text frames; forward the UTF-8 bytes.
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text.into_bytes()))),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue, // Ping/pong handled by tungstenite
                Some(Err(e)) => {
                    return Err(SocketError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }
}

/// Extract host from URL for the Host header.
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
