//! Connection Supervisor
//!
//! Owns one subscription key's connection lifecycle: connect, handshake,
//! receive, detect staleness, back off and retry, until cancelled or the
//! retry budget runs out.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                     ▲  │            │ close / error / stale
//!                     │  ▼            ▼
//!                     └─ Reconnecting ◄┘
//!                           │ retries exhausted
//!                           ▼
//!                         Failed
//! ```
//!
//! Any state goes to `Disconnected` when the key's cancellation token
//! fires. The worker task is the only writer of the key's state; the
//! manager reads it through [`SharedStatus`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StreamTransport, TransportConnector, TransportError};
use crate::domain::streaming::{ConnectionState, ConnectionStatus, MarketEvent};
use crate::domain::subscription::SubscriptionKey;
use crate::infrastructure::binance::codec::{ControlReply, FrameCodec, InboundFrame};
use crate::infrastructure::binance::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::infrastructure::binance::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::config::{DEFAULT_WS_URL, MarketStreamConfig, StreamSettings};
use crate::infrastructure::metrics;

/// Consumer callback for decoded market events.
pub type UpdateCallback = Arc<dyn Fn(MarketEvent) + Send + Sync>;

/// Consumer callback for connection state changes.
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

// =============================================================================
// Errors
// =============================================================================

/// Why a connection session ended.
///
/// Session errors never reach the caller; they drive `Reconnecting`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport failed or closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Opening the transport took too long.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The subscribe handshake failed or was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No data arrived within the staleness threshold.
    #[error("stream stale, no data for {silent_for:?}")]
    StalenessTimeout {
        /// Silence observed when the check fired.
        silent_for: Duration,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Settings shared by every supervisor a manager spawns.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Backoff settings.
    pub reconnect: ReconnectConfig,
    /// Staleness detection settings.
    pub heartbeat: HeartbeatConfig,
    /// Upper bound on opening a connection and writing the handshake.
    pub connect_timeout: Duration,
    /// Upper bound on closing a connection.
    pub close_timeout: Duration,
    /// Keys allowed inside a reconnect attempt at once (0 = unlimited).
    pub max_concurrent_reconnects: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_stream_settings(DEFAULT_WS_URL, &StreamSettings::default())
    }
}

impl SupervisorConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_stream_settings(url: impl Into<String>, settings: &StreamSettings) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
            connect_timeout: settings.connect_timeout,
            close_timeout: settings.close_timeout,
            max_concurrent_reconnects: settings.max_concurrent_reconnects,
        }
    }
}

impl From<&MarketStreamConfig> for SupervisorConfig {
    fn from(config: &MarketStreamConfig) -> Self {
        Self::from_stream_settings(config.ws_url.clone(), &config.stream)
    }
}

// =============================================================================
// Shared Status
// =============================================================================

/// Connection status written by the worker and read by the manager.
#[derive(Debug, Default)]
pub struct SharedStatus {
    state: RwLock<ConnectionState>,
    reconnect_attempt: AtomicU32,
    messages_received: AtomicU64,
    decode_errors: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
}

impl SharedStatus {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Point-in-time copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            reconnect_attempt: self.reconnect_attempt.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            last_message_at: *self.last_message_at.read(),
        }
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.state.write(), state)
    }

    fn set_attempt(&self, attempt: u32) {
        self.reconnect_attempt.store(attempt, Ordering::Relaxed);
    }

    fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// How a session ended.
enum SessionEnd {
    /// The key was torn down.
    Cancelled,
    /// The connection was lost or never established.
    Lost(SessionError),
}

/// Per-key connection worker.
///
/// Built by the manager and consumed by [`ConnectionSupervisor::run`] on its
/// own task. Owns the socket, heartbeat, retry timer and attempt counter.
pub struct ConnectionSupervisor {
    key: SubscriptionKey,
    generation: u64,
    config: SupervisorConfig,
    connector: Arc<dyn TransportConnector>,
    codec: FrameCodec,
    policy: ReconnectPolicy,
    on_update: UpdateCallback,
    on_state_change: Option<StateCallback>,
    status: Arc<SharedStatus>,
    cancel: CancellationToken,
    reconnect_permits: Option<Arc<Semaphore>>,
    attempt: u32,
    request_id: u64,
}

impl ConnectionSupervisor {
    /// Create a supervisor for `key`.
    #[must_use]
    pub fn new(
        key: SubscriptionKey,
        config: SupervisorConfig,
        connector: Arc<dyn TransportConnector>,
        on_update: UpdateCallback,
        on_state_change: Option<StateCallback>,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            key,
            generation: 0,
            config,
            connector,
            codec: FrameCodec::new(),
            policy,
            on_update,
            on_state_change,
            status: Arc::new(SharedStatus::default()),
            cancel: CancellationToken::new(),
            reconnect_permits: None,
            attempt: 0,
            request_id: 0,
        }
    }

    /// Tag this supervisor with a generation number.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a reconnect limiter with other supervisors.
    #[must_use]
    pub fn with_reconnect_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.reconnect_permits = Some(permits);
        self
    }

    /// Status handle readable from other tasks.
    #[must_use]
    pub fn status(&self) -> Arc<SharedStatus> {
        Arc::clone(&self.status)
    }

    /// Token that tears this supervisor down.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or the retry budget is exhausted.
    pub async fn run(mut self) {
        tracing::debug!(key = %self.key, generation = self.generation, "Supervisor started");

        loop {
            self.transition(ConnectionState::Connecting);

            let error = match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost(error) => error,
            };

            tracing::warn!(
                key = %self.key,
                generation = self.generation,
                attempt = self.attempt,
                error = %error,
                "Stream connection lost"
            );

            self.transition(ConnectionState::Reconnecting);

            if !self.policy.should_retry(self.attempt) {
                metrics::record_retries_exhausted();
                tracing::error!(
                    key = %self.key,
                    generation = self.generation,
                    attempts = self.attempt,
                    "Maximum reconnection attempts exceeded"
                );
                self.transition(ConnectionState::Failed);
                return;
            }

            let delay = self.policy.jittered_delay(self.attempt);
            tracing::info!(
                key = %self.key,
                attempt = self.attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to stream"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            self.attempt = self.attempt.saturating_add(1);
            self.status.set_attempt(self.attempt);
            metrics::record_reconnect();
        }

        self.finish();
    }

    /// One connect → handshake → receive cycle.
    async fn session(&mut self) -> SessionEnd {
        let permit = match self.acquire_reconnect_permit().await {
            Ok(permit) => permit,
            Err(end) => return end,
        };

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&self.config.url),
        );

        let mut transport = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = connect => match result {
                Ok(Ok(transport)) => transport,
                Ok(Err(e)) => return SessionEnd::Lost(e.into()),
                Err(_) => return SessionEnd::Lost(SessionError::ConnectTimeout(self.config.connect_timeout)),
            },
        };

        if let Some(end) = self.handshake(transport.as_mut()).await {
            self.close_transport(transport.as_mut()).await;
            return end;
        }
        drop(permit);

        self.attempt = 0;
        self.status.set_attempt(0);
        self.transition(ConnectionState::Connected);
        tracing::info!(key = %self.key, generation = self.generation, "Stream connected");

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat.clone());

        let error = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.close_transport(transport.as_mut()).await;
                    return SessionEnd::Cancelled;
                }
                silent_for = heartbeat.stalled() => {
                    metrics::record_staleness_timeout();
                    break SessionError::StalenessTimeout { silent_for };
                }
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.handle_frame(&text, &mut heartbeat) {
                            break e;
                        }
                    }
                    Some(Err(e)) => break e.into(),
                    None => break TransportError::Closed.into(),
                },
            }
        };

        self.close_transport(transport.as_mut()).await;
        SessionEnd::Lost(error)
    }

    /// Wait for a reconnect slot. First connections are never limited.
    async fn acquire_reconnect_permit(
        &self,
    ) -> Result<Option<tokio::sync::OwnedSemaphorePermit>, SessionEnd> {
        let Some(permits) = self.reconnect_permits.as_ref().filter(|_| self.attempt > 0) else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionEnd::Cancelled),
            permit = Arc::clone(permits).acquire_owned() => Ok(permit.ok()),
        }
    }

    /// Write the SUBSCRIBE frame. Returns how the session ended if it failed.
    async fn handshake(&mut self, transport: &mut dyn StreamTransport) -> Option<SessionEnd> {
        self.request_id += 1;

        let frame = match self.codec.encode_subscribe(&self.key, self.request_id) {
            Ok(frame) => frame,
            Err(e) => return Some(SessionEnd::Lost(SessionError::Handshake(e.to_string()))),
        };

        tracing::debug!(
            key = %self.key,
            stream = %self.key.stream_name(),
            id = self.request_id,
            "Sending subscribe request"
        );

        let send = tokio::time::timeout(self.config.connect_timeout, transport.send(frame));

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(SessionEnd::Cancelled),
            result = send => match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(SessionEnd::Lost(SessionError::Handshake(e.to_string()))),
                Err(_) => Some(SessionEnd::Lost(SessionError::Handshake(
                    "subscribe request timed out".to_string(),
                ))),
            },
        }
    }

    /// Decode and dispatch one text frame.
    fn handle_frame(
        &self,
        text: &str,
        heartbeat: &mut HeartbeatMonitor,
    ) -> Result<(), SessionError> {
        let started = std::time::Instant::now();

        match self.codec.decode(text) {
            Ok(InboundFrame::Update(event)) => {
                heartbeat.touch();
                self.status.record_message();
                metrics::record_frame_received(&event);

                if !self.cancel.is_cancelled() {
                    (self.on_update)(event);
                }

                metrics::record_processing_duration(started.elapsed());
                Ok(())
            }
            Ok(InboundFrame::Control(ControlReply::Ack { id })) => {
                heartbeat.touch();
                tracing::debug!(key = %self.key, id, "Subscription confirmed");
                Ok(())
            }
            Ok(InboundFrame::Control(ControlReply::Rejected { id, code, msg })) => {
                tracing::error!(key = %self.key, id, code, msg = %msg, "Subscription rejected");
                Err(SessionError::Handshake(format!("subscribe rejected ({code}): {msg}")))
            }
            Err(e) => {
                self.status.record_decode_error();
                metrics::record_decode_error();
                tracing::warn!(key = %self.key, error = %e, "Dropping undecodable frame");
                Ok(())
            }
        }
    }

    async fn close_transport(&self, transport: &mut dyn StreamTransport) {
        match tokio::time::timeout(self.config.close_timeout, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(key = %self.key, error = %e, "Error closing transport"),
            Err(_) => tracing::warn!(key = %self.key, "Transport close timed out"),
        }
    }

    /// Record a state change and notify the consumer unless torn down.
    fn transition(&self, state: ConnectionState) {
        let previous = self.status.set_state(state);
        metrics::record_state_transition(state);
        tracing::debug!(key = %self.key, from = %previous, to = %state, "State transition");

        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(on_state_change) = &self.on_state_change {
            on_state_change(state);
        }
    }

    /// Final `Disconnected`, delivered even though the token is cancelled.
    fn finish(&self) {
        self.status.set_state(ConnectionState::Disconnected);
        metrics::record_state_transition(ConnectionState::Disconnected);
        tracing::info!(key = %self.key, generation = self.generation, "Stream disconnected");

        if let Some(on_state_change) = &self.on_state_change {
            on_state_change(ConnectionState::Disconnected);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
