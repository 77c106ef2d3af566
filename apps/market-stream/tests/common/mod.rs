//! In-memory transport for driving the manager without a network.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use market_stream::{
    ConnectionState, HeartbeatConfig, MarketEvent, ReconnectConfig, StateCallback,
    StreamTransport, SupervisorConfig, TransportConnector, TransportError, UpdateCallback,
};

/// What the fake server pushes to the client.
enum Incoming {
    Frame(String),
    Error,
    Close,
}

/// Scripted connector that records every open and close.
pub struct FakeConnector {
    script: Mutex<VecDeque<bool>>,
    refuse_all: Mutex<bool>,
    connect_delay: Mutex<Duration>,
    connect_spans: Mutex<Vec<(Instant, Instant)>>,
    connect_calls: AtomicUsize,
    next_id: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
    servers_tx: mpsc::UnboundedSender<FakeServer>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            refuse_all: Mutex::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            connect_spans: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
            servers_tx,
            servers_rx: tokio::sync::Mutex::new(servers_rx),
        })
    }

    /// Refuse the next `n` connection attempts, then accept.
    pub fn refuse_next(&self, n: usize) {
        self.script.lock().extend(std::iter::repeat_n(false, n));
    }

    /// Refuse every connection attempt until `accept_all` is called.
    pub fn refuse_all(&self) {
        *self.refuse_all.lock() = true;
    }

    pub fn accept_all(&self) {
        *self.refuse_all.lock() = false;
    }

    /// Make every connection attempt take `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Start and end of every completed connection attempt, in call order.
    pub fn connect_spans(&self) -> Vec<(Instant, Instant)> {
        self.connect_spans.lock().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// `open:N` / `close:N` entries in the order they happened.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&self) -> FakeServer {
        let mut rx = self.servers_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("no connection was opened")
            .expect("connector dropped")
    }

    pub fn as_connector(self: &Arc<Self>) -> Arc<dyn TransportConnector> {
        Arc::clone(self) as Arc<dyn TransportConnector>
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn StreamTransport>, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connect_spans.lock().push((started, Instant::now()));

        let accept = self.script.lock().pop_front().unwrap_or(true) && !*self.refuse_all.lock();
        if !accept {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().push(format!("open:{id}"));

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));

        let _ = self.servers_tx.send(FakeServer {
            id,
            incoming: incoming_tx,
            sent: Arc::clone(&sent),
        });

        Ok(Box::new(FakeTransport {
            id,
            incoming: incoming_rx,
            sent,
            log: Arc::clone(&self.log),
            closed: false,
        }))
    }
}

/// Server side of one fake connection.
pub struct FakeServer {
    pub id: usize,
    incoming: mpsc::UnboundedSender<Incoming>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    pub fn push(&self, frame: &str) {
        let _ = self.incoming.send(Incoming::Frame(frame.to_string()));
    }

    pub fn fail(&self) {
        let _ = self.incoming.send(Incoming::Error);
    }

    pub fn close(&self) {
        let _ = self.incoming.send(Incoming::Close);
    }

    /// Frames the client has written.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

struct FakeTransport {
    id: usize,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }
        match self.incoming.recv().await {
            Some(Incoming::Frame(frame)) => Some(Ok(frame)),
            Some(Incoming::Error) => Some(Err(TransportError::ReceiveFailed(
                "connection reset".to_string(),
            ))),
            Some(Incoming::Close) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.log.lock().push(format!("close:{}", self.id));
        }
        Ok(())
    }
}

/// Collects everything delivered to a subscription's callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<MarketEvent>>>,
    states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(&self) -> UpdateCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| events.lock().push(event))
    }

    pub fn on_state(&self) -> Option<StateCallback> {
        let states = Arc::clone(&self.states);
        Some(Arc::new(move |state| states.lock().push(state)))
    }

    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    pub fn last_state(&self) -> Option<ConnectionState> {
        self.states.lock().last().copied()
    }

    pub fn count(&self, state: ConnectionState) -> usize {
        self.states.lock().iter().filter(|s| **s == state).count()
    }
}

/// Poll `condition` on the (paused) clock until it holds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..60_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Fast, deterministic settings: no jitter, 100ms base backoff, 3 retries,
/// 5s staleness checked every second.
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        url: "ws://fake.test/ws".to_string(),
        reconnect: ReconnectConfig::new(
            Duration::from_millis(100),
            Duration::from_millis(1600),
            0.0,
            3,
        ),
        heartbeat: HeartbeatConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ),
        connect_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_secs(1),
        max_concurrent_reconnects: 0,
    }
}

pub fn kline_frame(symbol: &str, open_time_ms: i64, close: &str, closed: bool) -> String {
    format!(
        r#"{{"e":"kline","E":{event},"s":"{symbol}","k":{{"t":{open_time_ms},"T":{close_time},"s":"{symbol}","i":"1m","o":"100.00","c":"{close}","h":"101.50","l":"99.25","v":"12.5","x":{closed}}}}}"#,
        event = open_time_ms + 1,
        close_time = open_time_ms + 59_999,
    )
}

pub fn ticker_frame(symbol: &str, last: &str) -> String {
    format!(
        r#"{{"e":"24hrTicker","E":1672515782136,"s":"{symbol}","p":"-12.50","P":"-0.50","c":"{last}","h":"2550.00","l":"2480.00","v":"9876.5"}}"#
    )
}
