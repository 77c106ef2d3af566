//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for the transport ports. Connects to the
//! exchange's raw stream endpoint and exposes inbound text frames to the
//! connection supervisor.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.binance.com:9443/ws`
//! - Data-only mirror: `wss://data-stream.binance.vision/ws`
//!
//! # Protocol
//!
//! Text frames carry JSON. The server pings periodically and expects a
//! pong with the same payload; that reply is handled here so the
//! supervisor only ever sees data frames.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{StreamTransport, TransportConnector, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamTransport>, TransportError> {
        tracing::debug!(url = %url, "Opening WebSocket");

        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketTransport::new(stream)))
    }
}

/// One open WebSocket connection.
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    const fn new(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| TransportError::ReceiveFailed(e.to_string())),
                    );
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Some(Err(TransportError::SendFailed(e.to_string())));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    self.closed = true;
                    return None;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
                None => {
                    tracing::info!("WebSocket stream ended");
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.close(None).await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}
