//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TransportConnector`: Opens a streaming connection to a URL
//! - `StreamTransport`: One open bidirectional text-frame connection
//!
//! The supervisor only ever sees these traits, so tests can drive it with
//! an in-memory transport and a paused clock.

use async_trait::async_trait;

/// Errors reported by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading from the connection failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The remote side closed the connection.
    #[error("connection closed by remote")]
    Closed,
}

/// One open streaming connection carrying text frames.
///
/// `recv` must be cancel-safe: the supervisor races it against timers and
/// the cancellation token inside `tokio::select!`.
#[async_trait]
pub trait StreamTransport: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next text frame.
    ///
    /// Returns `None` once the connection has ended.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for streaming connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamTransport>, TransportError>;
}
