//! Market Stream Manager
//!
//! Keyed registry of connection supervisors and the public entry point
//! for subscribing, unsubscribing and shutting down.
//!
//! # Concurrency
//!
//! - Each key runs one supervisor task, the only writer of its state.
//! - The registry map sits behind a `parking_lot::Mutex` that is never held
//!   across an `.await`.
//! - `subscribe`, `unsubscribe` and `close_all` are serialized by an async
//!   lifecycle lock, so teardown of a key's old connection always finishes
//!   before its replacement starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::supervisor::{
    ConnectionSupervisor, SharedStatus, StateCallback, SupervisorConfig, UpdateCallback,
};
use crate::application::ports::TransportConnector;
use crate::domain::streaming::{ConnectionState, ConnectionStatus};
use crate::domain::subscription::{StreamKind, SubscribeError, SubscriptionKey};
use crate::infrastructure::binance::websocket::WebSocketConnector;
use crate::infrastructure::metrics;

/// Registry entry for one live supervisor.
struct Registration {
    generation: u64,
    cancel: CancellationToken,
    status: Arc<SharedStatus>,
    handle: JoinHandle<()>,
}

/// Supervises one streaming connection per subscription key.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use market_stream::{MarketStreamManager, StreamKind, SupervisorConfig};
///
/// # async fn example() -> Result<(), market_stream::SubscribeError> {
/// let manager = MarketStreamManager::with_websocket(SupervisorConfig::default());
///
/// let key = manager
///     .subscribe(
///         "BTCUSDT",
///         StreamKind::Candle,
///         Some("1m"),
///         Arc::new(|event| println!("{event:?}")),
///         Some(Arc::new(|state| println!("connection {state}"))),
///     )
///     .await?;
///
/// manager.unsubscribe(&key).await;
/// # Ok(())
/// # }
/// ```
pub struct MarketStreamManager {
    config: SupervisorConfig,
    connector: Arc<dyn TransportConnector>,
    registry: Mutex<HashMap<SubscriptionKey, Registration>>,
    lifecycle: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    reconnect_permits: Option<Arc<Semaphore>>,
}

impl MarketStreamManager {
    /// Create a manager that opens connections through `connector`.
    #[must_use]
    pub fn new(config: SupervisorConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let reconnect_permits = (config.max_concurrent_reconnects > 0)
            .then(|| {
                let permits = config.max_concurrent_reconnects.min(Semaphore::MAX_PERMITS);
                Arc::new(Semaphore::new(permits))
            });

        Self {
            config,
            connector,
            registry: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            reconnect_permits,
        }
    }

    /// Create a manager backed by real WebSocket connections.
    #[must_use]
    pub fn with_websocket(config: SupervisorConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    /// Subscribe to a stream, replacing any existing subscription for the
    /// same key.
    ///
    /// Transport failures are never returned; they surface through
    /// `on_state_change`.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError` if the symbol or interval is invalid. Nothing
    /// is registered in that case.
    pub async fn subscribe(
        &self,
        symbol: &str,
        kind: StreamKind,
        interval: Option<&str>,
        on_update: UpdateCallback,
        on_state_change: Option<StateCallback>,
    ) -> Result<SubscriptionKey, SubscribeError> {
        let key = SubscriptionKey::new(symbol, kind, interval)?;
        self.subscribe_key(key.clone(), on_update, on_state_change)
            .await;
        Ok(key)
    }

    /// Subscribe with an already validated key.
    pub async fn subscribe_key(
        &self,
        key: SubscriptionKey,
        on_update: UpdateCallback,
        on_state_change: Option<StateCallback>,
    ) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.teardown(&key).await {
            tracing::info!(key = %key, "Replacing existing subscription");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        let mut supervisor = ConnectionSupervisor::new(
            key.clone(),
            self.config.clone(),
            Arc::clone(&self.connector),
            on_update,
            on_state_change,
        )
        .with_generation(generation)
        .with_cancel(cancel.clone());

        if let Some(permits) = &self.reconnect_permits {
            supervisor = supervisor.with_reconnect_permits(Arc::clone(permits));
        }

        let status = supervisor.status();
        let span = tracing::info_span!("stream", key = %key, generation);
        let handle = tokio::spawn(supervisor.run().instrument(span));

        let count = {
            let mut registry = self.registry.lock();
            registry.insert(
                key.clone(),
                Registration {
                    generation,
                    cancel,
                    status,
                    handle,
                },
            );
            registry.len()
        };
        metrics::set_subscriptions(count);

        tracing::info!(key = %key, generation, "Subscribed");
    }

    /// Tear down a subscription.
    ///
    /// Returns `false` if the key was not subscribed.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let removed = self.teardown(key).await;
        if removed {
            metrics::set_subscriptions(self.len());
            tracing::info!(key = %key, "Unsubscribed");
        }
        removed
    }

    /// Tear down every subscription and wait for all workers to finish.
    pub async fn close_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let drained: Vec<(SubscriptionKey, Registration)> = {
            let mut registry = self.registry.lock();
            for registration in registry.values() {
                registration.cancel.cancel();
            }
            registry.drain().collect()
        };

        let count = drained.len();
        let joins = drained
            .into_iter()
            .map(|(key, registration)| join_worker(key, registration));
        futures::future::join_all(joins).await;

        metrics::set_subscriptions(0);
        tracing::info!(closed = count, "All subscriptions closed");
    }

    /// Current state of `key`; `Disconnected` if it is not subscribed.
    #[must_use]
    pub fn get_state(&self, key: &SubscriptionKey) -> ConnectionState {
        self.registry
            .lock()
            .get(key)
            .map_or(ConnectionState::Disconnected, |r| r.status.state())
    }

    /// Full status of `key`, if subscribed.
    #[must_use]
    pub fn status(&self, key: &SubscriptionKey) -> Option<ConnectionStatus> {
        self.registry.lock().get(key).map(|r| r.status.snapshot())
    }

    /// Status of every subscription, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SubscriptionKey, ConnectionStatus)> {
        let mut entries: Vec<_> = self
            .registry
            .lock()
            .iter()
            .map(|(key, r)| (key.clone(), r.status.snapshot()))
            .collect();
        entries.sort_by_cached_key(|(key, _)| key.to_string());
        entries
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Check if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Cancel, deregister and await the worker for `key`. Caller holds the
    /// lifecycle lock.
    async fn teardown(&self, key: &SubscriptionKey) -> bool {
        let registration = {
            let mut registry = self.registry.lock();
            if let Some(registration) = registry.get(key) {
                registration.cancel.cancel();
            }
            registry.remove(key)
        };

        match registration {
            Some(registration) => {
                join_worker(key.clone(), registration).await;
                true
            }
            None => false,
        }
    }
}

impl Drop for MarketStreamManager {
    fn drop(&mut self) {
        for registration in self.registry.get_mut().values() {
            registration.cancel.cancel();
        }
    }
}

async fn join_worker(key: SubscriptionKey, registration: Registration) {
    let generation = registration.generation;
    if let Err(e) = registration.handle.await {
        tracing::error!(key = %key, generation, error = %e, "Supervisor task failed");
    }
}
