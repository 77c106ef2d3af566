//! Binance WebSocket Adapters
//!
//! Public market data streams (klines and 24h tickers):
//!
//! - **codec**: JSON frame decoding and the SUBSCRIBE handshake
//! - **reconnect**: capped exponential backoff
//! - **heartbeat**: data-freshness watchdog
//! - **websocket**: `tokio-tungstenite` transport

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod websocket;

pub use codec::{ControlReply, DecodeError, FrameCodec, InboundFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::{WebSocketConnector, WebSocketTransport};
