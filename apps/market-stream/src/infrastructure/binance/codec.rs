//! Stream Codec Module
//!
//! Decodes raw text frames from the exchange into domain events and
//! encodes the subscribe handshake. Decoding is pure: a malformed frame
//! yields a `DecodeError` for the caller to log and drop, and never
//! affects the connection.
//!
//! # Accepted Frames
//!
//! - Kline events (`"e":"kline"`) and flat candle objects (`t,T,s,i,o,c,h,l,v,x`)
//! - 24h ticker events (`"e":"24hrTicker"`) and flat ticker objects
//! - Combined-stream envelopes (`{"stream":...,"data":{...}}`)
//! - Replies to requests (`{"result":null,"id":1}`)

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::streaming::{CandleUpdate, MarketEvent, TickerUpdate};
use crate::domain::subscription::{Interval, SubscriptionKey};
use crate::infrastructure::binance::messages::{
    CombinedStreamEnvelope, ControlReplyMessage, KlineEvent, KlinePayload, SubscribeRequest,
    TickerPayload,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A numeric field did not parse as a decimal.
    #[error("invalid number in field {field:?}: {value:?}")]
    InvalidNumber {
        /// Wire field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A timestamp was out of range.
    #[error("invalid timestamp in field {field:?}: {value}")]
    InvalidTimestamp {
        /// Wire field name.
        field: &'static str,
        /// Raw milliseconds.
        value: i64,
    },

    /// The interval is not one the exchange defines.
    #[error("invalid interval: {0:?}")]
    InvalidInterval(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Market data for consumers.
    Update(MarketEvent),
    /// Reply to a request sent on this connection.
    Control(ControlReply),
}

/// Reply to a request sent on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Request accepted.
    Ack {
        /// Request id.
        id: u64,
    },
    /// Request rejected.
    Rejected {
        /// Request id.
        id: u64,
        /// Exchange error code.
        code: i64,
        /// Exchange error message.
        msg: String,
    },
}

/// JSON codec for the exchange's market data streams.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, has an unknown
    /// shape, or any numeric field fails to parse.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, DecodeError> {
        let value: Value = serde_json::from_str(text.trim())?;

        let value = if is_envelope(&value) {
            let envelope: CombinedStreamEnvelope = serde_json::from_value(value)?;
            tracing::trace!(stream = %envelope.stream, "Unwrapping combined stream frame");
            envelope.data
        } else {
            value
        };

        let shape = classify(&value).ok_or_else(|| {
            DecodeError::InvalidFormat(format!("unrecognized frame: {}", truncate(text)))
        })?;

        let event = match shape {
            FrameShape::Control => {
                let reply: ControlReplyMessage = serde_json::from_value(value)?;
                return Ok(InboundFrame::Control(control_reply(reply)));
            }
            FrameShape::KlineEvent => {
                let event: KlineEvent = serde_json::from_value(value)?;
                MarketEvent::Candle(candle_update(event.kline)?)
            }
            FrameShape::Candle => {
                let payload: KlinePayload = serde_json::from_value(value)?;
                MarketEvent::Candle(candle_update(payload)?)
            }
            FrameShape::Ticker => {
                let payload: TickerPayload = serde_json::from_value(value)?;
                MarketEvent::Ticker(ticker_update(payload)?)
            }
            FrameShape::UnknownEvent(event_type) => {
                return Err(DecodeError::UnknownEventType(event_type));
            }
        };

        Ok(InboundFrame::Update(event))
    }

    /// Encode the subscribe handshake for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(&self, key: &SubscriptionKey, id: u64) -> Result<String, DecodeError> {
        let request = SubscribeRequest::subscribe(vec![key.stream_name()], id);
        Ok(serde_json::to_string(&request)?)
    }
}

/// Shape of a frame, determined before it is deserialized.
enum FrameShape {
    Control,
    KlineEvent,
    Candle,
    Ticker,
    UnknownEvent(String),
}

fn classify(value: &Value) -> Option<FrameShape> {
    let object = value.as_object()?;

    if object.contains_key("id") && (object.contains_key("result") || object.contains_key("error"))
    {
        return Some(FrameShape::Control);
    }

    match object.get("e").and_then(Value::as_str) {
        Some("kline") => Some(FrameShape::KlineEvent),
        Some("24hrTicker") => Some(FrameShape::Ticker),
        Some(other) => Some(FrameShape::UnknownEvent(other.to_string())),
        None if looks_like_candle(object) => Some(FrameShape::Candle),
        None if looks_like_ticker(object) => Some(FrameShape::Ticker),
        None => None,
    }
}

fn is_envelope(value: &Value) -> bool {
    value.get("stream").is_some() && value.get("data").is_some()
}

fn looks_like_candle(object: &Map<String, Value>) -> bool {
    ["t", "T", "i", "x"].iter().all(|field| object.contains_key(*field))
}

fn looks_like_ticker(object: &Map<String, Value>) -> bool {
    ["c", "p", "P"].iter().all(|field| object.contains_key(*field))
}

fn control_reply(reply: ControlReplyMessage) -> ControlReply {
    match reply.error {
        Some(error) => ControlReply::Rejected {
            id: reply.id,
            code: error.code,
            msg: error.msg,
        },
        None => ControlReply::Ack { id: reply.id },
    }
}

fn candle_update(payload: KlinePayload) -> Result<CandleUpdate, DecodeError> {
    let interval = Interval::from_str(&payload.interval)
        .map_err(|_| DecodeError::InvalidInterval(payload.interval.clone()))?;

    Ok(CandleUpdate {
        open_time: parse_millis("t", payload.start_time)?,
        close_time: parse_millis("T", payload.end_time)?,
        open: parse_decimal("o", &payload.open)?,
        high: parse_decimal("h", &payload.high)?,
        low: parse_decimal("l", &payload.low)?,
        close: parse_decimal("c", &payload.close)?,
        volume: parse_decimal("v", &payload.volume)?,
        is_closed: payload.is_closed,
        interval,
        symbol: payload.symbol,
    })
}

fn ticker_update(payload: TickerPayload) -> Result<TickerUpdate, DecodeError> {
    Ok(TickerUpdate {
        last_price: parse_decimal("c", &payload.last_price)?,
        change_abs: parse_decimal("p", &payload.price_change)?,
        change_pct: parse_decimal("P", &payload.price_change_percent)?,
        high_24h: parse_decimal("h", &payload.high)?,
        low_24h: parse_decimal("l", &payload.low)?,
        volume_24h: parse_decimal("v", &payload.volume)?,
        symbol: payload.symbol,
    })
}

/// Parse a decimal string. `Decimal::from_str` rejects both malformed input
/// and values beyond 96-bit precision.
fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, DecodeError> {
    Decimal::from_str(raw.trim()).map_err(|_| DecodeError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

fn parse_millis(field: &'static str, millis: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp_millis(millis).ok_or(DecodeError::InvalidTimestamp {
        field,
        value: millis,
    })
}

fn truncate(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}
