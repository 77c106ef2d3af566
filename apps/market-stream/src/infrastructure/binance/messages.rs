//! Binance WebSocket Message Types
//!
//! Wire format types for the exchange's public market data streams.
//! These types map directly to the JSON schemas; conversion into domain
//! types (with numeric parsing) happens in the codec.
//!
//! # Message Types
//!
//! ## Market Data
//! - `KlineEvent`: Candle update wrapping a `KlinePayload`
//! - `TickerPayload`: Rolling 24h ticker
//!
//! ## Control
//! - `SubscribeRequest`: Outbound `SUBSCRIBE` request
//! - `ControlReplyMessage`: Response to a request (`result` or `error`)
//! - `CombinedStreamEnvelope`: `{"stream": ..., "data": ...}` wrapper used
//!   by combined-stream endpoints
//!
//! All prices and quantities are transmitted as decimal strings.
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use serde::{Deserialize, Serialize};

// =============================================================================
// Market Data Messages
// =============================================================================

/// Kline (candle) event.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "kline", "E": 1672515782136, "s": "BTCUSDT",
///   "k": {
///     "t": 1672515780000, "T": 1672515839999, "s": "BTCUSDT", "i": "1m",
///     "o": "16850.00", "c": "16852.10", "h": "16853.00", "l": "16849.50",
///     "v": "12.345", "x": false
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineEvent {
    /// Event type (always "kline")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (ms)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Bar payload
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

/// Candle fields shared by kline events and flat candle frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlinePayload {
    /// Bar start time (ms)
    #[serde(rename = "t")]
    pub start_time: i64,

    /// Bar end time (ms)
    #[serde(rename = "T")]
    pub end_time: i64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Interval, e.g. "1m"
    #[serde(rename = "i")]
    pub interval: String,

    /// Open price
    #[serde(rename = "o")]
    pub open: String,

    /// Close price
    #[serde(rename = "c")]
    pub close: String,

    /// High price
    #[serde(rename = "h")]
    pub high: String,

    /// Low price
    #[serde(rename = "l")]
    pub low: String,

    /// Base asset volume
    #[serde(rename = "v")]
    pub volume: String,

    /// Whether the bar is closed
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// Rolling 24h ticker.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "24hrTicker", "E": 1672515782136, "s": "BTCUSDT",
///   "p": "120.50", "P": "0.72", "c": "16852.10",
///   "h": "16900.00", "l": "16700.00", "v": "18234.11"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerPayload {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Last price
    #[serde(rename = "c")]
    pub last_price: String,

    /// Absolute price change
    #[serde(rename = "p")]
    pub price_change: String,

    /// Percent price change
    #[serde(rename = "P")]
    pub price_change_percent: String,

    /// High price
    #[serde(rename = "h")]
    pub high: String,

    /// Low price
    #[serde(rename = "l")]
    pub low: String,

    /// Base asset volume
    #[serde(rename = "v")]
    pub volume: String,
}

// =============================================================================
// Control Messages
// =============================================================================

/// Combined stream wrapper.
///
/// # Wire Format (JSON)
/// ```json
/// {"stream": "btcusdt@kline_1m", "data": {"e": "kline", ...}}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CombinedStreamEnvelope {
    /// Stream name
    pub stream: String,

    /// Wrapped event
    pub data: serde_json::Value,
}

/// Outbound subscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@kline_1m"], "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Request method
    pub method: String,

    /// Stream names
    pub params: Vec<String>,

    /// Request id echoed in the reply
    pub id: u64,
}

impl SubscribeRequest {
    /// Create a subscribe request for the given streams.
    #[must_use]
    pub fn subscribe(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: streams,
            id,
        }
    }
}

/// Reply to a request.
///
/// # Wire Format (JSON)
/// ```json
/// {"result": null, "id": 1}
/// {"error": {"code": 2, "msg": "Invalid request"}, "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlReplyMessage {
    /// Result payload (`null` on success)
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Error payload
    #[serde(default)]
    pub error: Option<ControlErrorMessage>,

    /// Request id
    pub id: u64,
}

/// Error payload of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlErrorMessage {
    /// Error code
    pub code: i64,

    /// Error message
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_serialization() {
        let request = SubscribeRequest::subscribe(vec!["btcusdt@ticker".to_string()], 7);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["btcusdt@ticker"],"id":7}"#
        );
    }

    #[test]
    fn kline_event_ignores_extra_fields() {
        let json = r#"{
            "e":"kline","E":1,"s":"BTCUSDT",
            "k":{"t":0,"T":59999,"s":"BTCUSDT","i":"1m","f":100,"L":200,
                 "o":"1","c":"2","h":"3","l":"0.5","v":"10","n":100,"x":true,"q":"1.0"}
        }"#;
        let event: KlineEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kline.interval, "1m");
        assert!(event.kline.is_closed);
    }

    #[test]
    fn numeric_price_is_rejected() {
        let json = r#"{"s":"BTCUSDT","c":100.5,"p":"1","P":"1","h":"1","l":"1","v":"1"}"#;
        assert!(serde_json::from_str::<TickerPayload>(json).is_err());
    }

    #[test]
    fn control_reply_error() {
        let json = r#"{"error":{"code":2,"msg":"Invalid request"},"id":3}"#;
        let reply: ControlReplyMessage = serde_json::from_str(json).unwrap();
        assert_eq!(reply.id, 3);
        assert_eq!(reply.error.unwrap().code, 2);
    }
}
