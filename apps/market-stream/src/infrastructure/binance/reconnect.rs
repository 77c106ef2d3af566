//! Reconnection Policy
//!
//! Exponential backoff for WebSocket reconnection, as a pure function of
//! the attempt number. The connection supervisor owns the attempt counter;
//! this module only answers "how long to wait" and "whether to try again".

use std::time::Duration;

use rand::Rng;

/// Largest exponent applied to the base delay. `2^32` already exceeds any
/// sane cap, so growth is clamped here instead of overflowing.
const MAX_EXPONENT: u32 = 32;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor,
            max_attempts,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            base_delay: settings.reconnect_delay_base,
            max_delay: settings.reconnect_delay_max,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing capped exponential backoff.
///
/// # Example
///
/// ```rust
/// use market_stream::infrastructure::binance::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(0), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(3), Duration::from_secs(8));
/// assert_eq!(policy.next_delay(40), Duration::from_secs(16));
///
/// assert!(policy.should_retry(9));
/// assert!(!policy.should_retry(10));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Get the policy configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay before reconnection attempt `attempt` (0-based):
    /// `min(base * 2^attempt, max_delay)`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT - 1);
        self.config
            .base_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// `next_delay` with ±`jitter_factor` randomization, kept within
    /// `[1ms, max_delay]`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.next_delay(attempt))
    }

    /// Check if another attempt is allowed after `attempt` failed ones.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_attempts == 0 || attempt < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if !self.config.jitter_factor.is_finite() || self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64).min(self.config.max_delay)
    }
}
