//! Market Stream Configuration Settings
//!
//! Configuration types for the market stream service, loaded from
//! environment variables. Unparsable, zero or non-finite numeric values fall
//! back to their defaults; a malformed subscription entry is an error.

use std::str::FromStr;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::domain::subscription::{SubscribeError, SubscriptionKey};

/// Default public stream endpoint.
pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Per-connection stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Interval between staleness checks.
    pub heartbeat_interval: Duration,
    /// Silence longer than this forces a reconnect.
    pub staleness_threshold: Duration,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_base: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Backoff jitter as a fraction of the delay (0 = exact schedule).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Keys allowed inside a reconnect attempt at once (0 = unlimited).
    pub max_concurrent_reconnects: usize,
    /// Upper bound on opening a connection.
    pub connect_timeout: Duration,
    /// Upper bound on closing a connection during teardown.
    pub close_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(120),
            reconnect_delay_base: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(16),
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 10,
            max_concurrent_reconnects: 0, // Unlimited
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete market stream configuration.
#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    /// WebSocket endpoint.
    pub ws_url: String,
    /// Keys subscribed at startup.
    pub subscriptions: Vec<SubscriptionKey>,
    /// Server port settings.
    pub server: ServerSettings,
    /// Stream connection settings.
    pub stream: StreamSettings,
}

impl Default for MarketStreamConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            subscriptions: Vec::new(),
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl MarketStreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_STREAM_SUBSCRIPTIONS` contains a
    /// malformed entry.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_STREAM_SUBSCRIPTIONS` contains a
    /// malformed entry.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = StreamSettings::default();

        let ws_url = env
            .get("MARKET_STREAM_WS_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let subscriptions = env
            .get("MARKET_STREAM_SUBSCRIPTIONS")
            .map(|raw| parse_subscriptions(&raw))
            .transpose()?
            .unwrap_or_default();

        let server = ServerSettings {
            health_port: env.parse(
                "MARKET_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let stream = StreamSettings {
            heartbeat_interval: env.secs(
                "MARKET_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            staleness_threshold: env.secs(
                "MARKET_STREAM_STALENESS_THRESHOLD_SECS",
                defaults.staleness_threshold,
            ),
            reconnect_delay_base: env.millis(
                "MARKET_STREAM_RECONNECT_DELAY_BASE_MS",
                defaults.reconnect_delay_base,
            ),
            reconnect_delay_max: env.secs(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_jitter: env
                .get("MARKET_STREAM_RECONNECT_JITTER")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|jitter| jitter.is_finite())
                .map_or(defaults.reconnect_jitter, |jitter| jitter.clamp(0.0, 1.0)),
            max_reconnect_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            max_concurrent_reconnects: env
                .parse(
                    "MARKET_STREAM_MAX_CONCURRENT_RECONNECTS",
                    defaults.max_concurrent_reconnects,
                )
                .min(Semaphore::MAX_PERMITS),
            connect_timeout: env.secs(
                "MARKET_STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            close_timeout: env.secs("MARKET_STREAM_CLOSE_TIMEOUT_SECS", defaults.close_timeout),
        };

        Ok(Self {
            ws_url,
            subscriptions,
            server,
            stream,
        })
    }
}

/// Parse a comma-separated list of `SYMBOL:kind[:interval]` entries.
/// Blank entries are skipped and duplicates collapse to the first.
///
/// # Errors
///
/// Returns an error naming the first malformed entry.
pub fn parse_subscriptions(raw: &str) -> Result<Vec<SubscriptionKey>, ConfigError> {
    let mut keys: Vec<SubscriptionKey> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let key = SubscriptionKey::from_str(entry).map_err(|source| {
            ConfigError::InvalidSubscription {
                entry: entry.to_string(),
                source,
            }
        })?;

        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    Ok(keys)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A subscription entry could not be parsed.
    #[error("invalid subscription {entry:?}: {source}")]
    InvalidSubscription {
        /// Offending entry.
        entry: String,
        /// Validation failure.
        source: SubscribeError,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Durations must be non-zero; zero falls back to `default`.
    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_millis)
    }

    fn positive(&self, key: &str) -> Option<u64> {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&n| n > 0)
    }
}
