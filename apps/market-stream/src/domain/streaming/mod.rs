//! Market Data Streaming Types
//!
//! Core domain types for market data: candles, tickers, and the
//! connection state of a subscription. These types are codec-agnostic
//! and represent the canonical internal representation of market data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::subscription::Interval;

// =============================================================================
// Market Events
// =============================================================================

/// OHLCV bar update.
///
/// `is_closed` distinguishes a finalized bar from one still in progress;
/// an in-progress bar may be revised by later updates with the same
/// `open_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandleUpdate {
    /// Trading symbol.
    pub symbol: String,
    /// Bar interval.
    pub interval: Interval,
    /// Bar start time.
    pub open_time: DateTime<Utc>,
    /// Bar end time.
    pub close_time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close (or latest) price.
    pub close: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Whether the bar is final.
    pub is_closed: bool,
}

/// Rolling 24h ticker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerUpdate {
    /// Trading symbol.
    pub symbol: String,
    /// Last traded price.
    pub last_price: Decimal,
    /// Absolute price change over 24h.
    pub change_abs: Decimal,
    /// Percent price change over 24h.
    pub change_pct: Decimal,
    /// 24h high.
    pub high_24h: Decimal,
    /// 24h low.
    pub low_24h: Decimal,
    /// 24h base asset volume.
    pub volume_24h: Decimal,
}

/// Decoded market data event delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketEvent {
    /// Candle update.
    Candle(CandleUpdate),
    /// Ticker update.
    Ticker(TickerUpdate),
}

impl MarketEvent {
    /// Symbol the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Candle(candle) => &candle.symbol,
            Self::Ticker(ticker) => &ticker.symbol,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one subscription's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and none scheduled.
    #[default]
    Disconnected,
    /// Opening the transport and sending the subscribe handshake.
    Connecting,
    /// Receiving data.
    Connected,
    /// Connection lost; a retry is scheduled.
    Reconnecting,
    /// Retry budget exhausted. Terminal until subscribed again.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Check if data is currently flowing.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempt: u32,
    /// Frames decoded into market events.
    pub messages_received: u64,
    /// Frames dropped because they failed to decode.
    pub decode_errors: u64,
    /// Wall-clock time of the last decoded frame.
    pub last_message_at: Option<DateTime<Utc>>,
}
