#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Real-time Market Data Connection Manager
//!
//! Opens, multiplexes, monitors and recovers one WebSocket subscription per
//! `(symbol, stream kind, interval)` key, and delivers decoded candle and
//! ticker updates to consumer callbacks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `subscription`: Validated subscription keys and intervals
//!   - `streaming`: Market events and connection state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport interfaces
//!   - `services`: Connection supervisor and subscription manager
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Frame codec, backoff, heartbeat, WebSocket transport
//!   - `config`: Environment-driven configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────────────────────┐
//! subscribe(key) ──► │ MarketStreamManager          │
//!                    │  key ─► ConnectionSupervisor │──► WebSocket ──► exchange
//!                    └──────────────────────────────┘        │
//!                                                            ▼
//!        on_update(MarketEvent) ◄── FrameCodec ◄── text frames
//!        on_state_change(ConnectionState)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    CandleUpdate, ConnectionState, ConnectionStatus, MarketEvent, TickerUpdate,
};
pub use domain::subscription::{Interval, StreamKind, SubscribeError, SubscriptionKey};

// Ports
pub use application::ports::{StreamTransport, TransportConnector, TransportError};

// Services
pub use application::services::{
    MarketStreamManager, SessionError, StateCallback, SupervisorConfig, UpdateCallback,
};

// Stream adapters
pub use infrastructure::binance::{
    DecodeError, FrameCodec, HeartbeatConfig, InboundFrame, ReconnectConfig, ReconnectPolicy,
    WebSocketConnector,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, MarketStreamConfig, ServerSettings, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
