//! Heartbeat Monitor
//!
//! Detects half-open connections: the transport still reports itself open
//! but the remote side has stopped sending data. Liveness is defined by
//! data freshness, so only successfully decoded frames count; transport
//! ping/pong frames do not.
//!
//! The monitor is owned by the connection's worker task and polled from
//! the same `tokio::select!` as the receive loop, so the "last seen" clock
//! has exactly one writer.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Floor for the check period; `tokio::time::interval` rejects zero.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between staleness checks.
    pub check_interval: Duration,
    /// Silence longer than this marks the connection stale.
    pub staleness_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(120),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(check_interval: Duration, staleness_threshold: Duration) -> Self {
        Self {
            check_interval,
            staleness_threshold,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            check_interval: settings.heartbeat_interval,
            staleness_threshold: settings.staleness_threshold,
        }
    }
}

/// Per-connection data-freshness watchdog.
///
/// # Example
///
/// ```rust,no_run
/// use market_stream::infrastructure::binance::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
///
/// async fn example(mut frames: tokio::sync::mpsc::Receiver<String>) {
///     let mut heartbeat = HeartbeatMonitor::new(HeartbeatConfig::default());
///
///     loop {
///         tokio::select! {
///             silent_for = heartbeat.stalled() => {
///                 println!("no data for {silent_for:?}, reconnecting");
///                 break;
///             }
///             frame = frames.recv() => match frame {
///                 Some(_) => heartbeat.touch(),
///                 None => break,
///             }
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_seen: Instant,
    ticker: Interval,
}

impl HeartbeatMonitor {
    /// Start monitoring. The clock starts at "now" and the first check runs
    /// one `check_interval` later.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        let period = config.check_interval.max(MIN_CHECK_INTERVAL);
        let mut ticker = tokio::time::interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            config,
            last_seen: now,
            ticker,
        }
    }

    /// Record that a frame was received.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last received frame.
    #[must_use]
    pub fn silent_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Check whether the connection is stale right now.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.silent_for() > self.config.staleness_threshold
    }

    /// Resolve on the first check tick that finds the connection stale,
    /// returning how long it has been silent.
    ///
    /// Cancel-safe: dropping the future loses no state.
    pub async fn stalled(&mut self) -> Duration {
        loop {
            self.ticker.tick().await;

            let silent_for = self.silent_for();
            if silent_for > self.config.staleness_threshold {
                tracing::warn!(
                    silent_secs = silent_for.as_secs(),
                    threshold_secs = self.config.staleness_threshold.as_secs(),
                    "Stream stale, no data within threshold"
                );
                return silent_for;
            }

            tracing::trace!(silent_ms = silent_for.as_millis(), "Heartbeat check passed");
        }
    }
}
