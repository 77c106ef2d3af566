//! Subscription Keys
//!
//! Identity of one logical market data stream: a symbol, the kind of
//! stream, and (for candles) the bar interval.
//!
//! # Design
//!
//! A `SubscriptionKey` is validated once at construction and is immutable
//! afterwards. Everything downstream (registry lookups, stream names,
//! log fields) derives from the key, so an invalid symbol or interval is
//! rejected before any connection resource exists.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

/// Longest symbol accepted by the exchange.
const MAX_SYMBOL_LEN: usize = 20;

/// Kind of market data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// OHLCV candle (kline) updates.
    Candle,
    /// Rolling 24h ticker updates.
    Ticker,
}

impl StreamKind {
    /// Get the stream kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Candle => "candle",
            Self::Ticker => "ticker",
        }
    }

    /// Parse a stream kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "candle" | "kline" => Some(Self::Candle),
            "ticker" => Some(Self::Ticker),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle bar interval supported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Interval {
    /// 1 second.
    #[serde(rename = "1s")]
    OneSecond,
    /// 1 minute.
    #[serde(rename = "1m")]
    OneMinute,
    /// 3 minutes.
    #[serde(rename = "3m")]
    ThreeMinutes,
    /// 5 minutes.
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minutes.
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 30 minutes.
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// 1 hour.
    #[serde(rename = "1h")]
    OneHour,
    /// 2 hours.
    #[serde(rename = "2h")]
    TwoHours,
    /// 4 hours.
    #[serde(rename = "4h")]
    FourHours,
    /// 6 hours.
    #[serde(rename = "6h")]
    SixHours,
    /// 8 hours.
    #[serde(rename = "8h")]
    EightHours,
    /// 12 hours.
    #[serde(rename = "12h")]
    TwelveHours,
    /// 1 day.
    #[serde(rename = "1d")]
    OneDay,
    /// 3 days.
    #[serde(rename = "3d")]
    ThreeDays,
    /// 1 week.
    #[serde(rename = "1w")]
    OneWeek,
    /// 1 month.
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    /// Get all supported intervals.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OneSecond,
            Self::OneMinute,
            Self::ThreeMinutes,
            Self::FiveMinutes,
            Self::FifteenMinutes,
            Self::ThirtyMinutes,
            Self::OneHour,
            Self::TwoHours,
            Self::FourHours,
            Self::SixHours,
            Self::EightHours,
            Self::TwelveHours,
            Self::OneDay,
            Self::ThreeDays,
            Self::OneWeek,
            Self::OneMonth,
        ]
    }

    /// Get the wire name of the interval (`1m`, `4h`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl FromStr for Interval {
    type Err = SubscribeError;

    // Case matters: `1m` is a minute, `1M` is a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| SubscribeError::InvalidInterval(s.to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Subscription Key
// =============================================================================

/// Identity of one logical subscription.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscription::{StreamKind, SubscriptionKey};
///
/// let key = SubscriptionKey::candle("btcusdt", "1m").unwrap();
/// assert_eq!(key.symbol(), "BTCUSDT");
/// assert_eq!(key.kind(), StreamKind::Candle);
/// assert_eq!(key.stream_name(), "btcusdt@kline_1m");
///
/// assert!(SubscriptionKey::ticker("BTC-USDT").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionKey {
    symbol: String,
    kind: StreamKind,
    interval: Option<Interval>,
}

impl SubscriptionKey {
    /// Create a validated key.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError` if the symbol is malformed, the interval is
    /// unknown, or the interval does not fit the stream kind.
    pub fn new(
        symbol: &str,
        kind: StreamKind,
        interval: Option<&str>,
    ) -> Result<Self, SubscribeError> {
        let symbol = normalize_symbol(symbol)?;

        let interval = match (kind, interval) {
            (StreamKind::Candle, Some(raw)) => Some(raw.parse::<Interval>()?),
            (StreamKind::Candle, None) => return Err(SubscribeError::MissingInterval),
            (StreamKind::Ticker, Some(raw)) => {
                return Err(SubscribeError::UnexpectedInterval(raw.to_string()));
            }
            (StreamKind::Ticker, None) => None,
        };

        Ok(Self {
            symbol,
            kind,
            interval,
        })
    }

    /// Create a candle subscription key.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError` on an invalid symbol or interval.
    pub fn candle(symbol: &str, interval: &str) -> Result<Self, SubscribeError> {
        Self::new(symbol, StreamKind::Candle, Some(interval))
    }

    /// Create a ticker subscription key.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError` on an invalid symbol.
    pub fn ticker(symbol: &str) -> Result<Self, SubscribeError> {
        Self::new(symbol, StreamKind::Ticker, None)
    }

    /// Upper-case trading symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Stream kind.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Candle interval, `None` for tickers.
    #[must_use]
    pub const fn interval(&self) -> Option<Interval> {
        self.interval
    }

    /// Exchange stream identifier, e.g. `btcusdt@kline_1m` or `ethusdt@ticker`.
    #[must_use]
    pub fn stream_name(&self) -> String {
        let symbol = self.symbol.to_lowercase();
        match self.interval {
            Some(interval) => format!("{symbol}@kline_{interval}"),
            None => format!("{symbol}@ticker"),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interval {
            Some(interval) => write!(f, "{}:{}:{interval}", self.symbol, self.kind),
            None => write!(f, "{}:{}", self.symbol, self.kind),
        }
    }
}

impl FromStr for SubscriptionKey {
    type Err = SubscribeError;

    /// Parse `SYMBOL:kind[:interval]`, the format used by configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let symbol = parts.next().unwrap_or_default();
        let kind = parts
            .next()
            .and_then(StreamKind::from_str_case_insensitive)
            .ok_or_else(|| SubscribeError::InvalidKey(s.to_string()))?;
        let interval = parts.next();

        if parts.next().is_some() {
            return Err(SubscribeError::InvalidKey(s.to_string()));
        }

        Self::new(symbol, kind, interval)
    }
}

fn normalize_symbol(symbol: &str) -> Result<String, SubscribeError> {
    let trimmed = symbol.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_SYMBOL_LEN
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric());

    if valid {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(SubscribeError::InvalidSymbol(symbol.to_string()))
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Invalid arguments to a subscribe call.
///
/// These are programmer errors: they are returned synchronously and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// Symbol is empty, too long, or contains non-alphanumeric characters.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// Interval is not one the exchange supports.
    #[error("invalid interval: {0:?}")]
    InvalidInterval(String),

    /// Candle stream requested without an interval.
    #[error("candle streams require an interval")]
    MissingInterval,

    /// Interval given for a stream kind that has none.
    #[error("ticker streams take no interval, got {0:?}")]
    UnexpectedInterval(String),

    /// Key string is not `SYMBOL:kind[:interval]`.
    #[error("invalid subscription key: {0:?}")]
    InvalidKey(String),
}

// =============================================================================
// Tests
// =============================================================================
