//! Connection Lifecycle Integration Tests
//!
//! Drives `MarketStreamManager` against an in-memory transport on a paused
//! clock: delivery, reconnection, staleness, retry exhaustion and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;

use common::{FakeConnector, Recorder, kline_frame, test_config, ticker_frame, wait_until};
use market_stream::{
    ConnectionState, MarketEvent, MarketStreamManager, StreamKind, SubscribeError,
    SubscriptionKey,
};

use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

fn manager(connector: &std::sync::Arc<FakeConnector>) -> MarketStreamManager {
    MarketStreamManager::new(test_config(), connector.as_connector())
}

fn unlimited_retries_manager(connector: &std::sync::Arc<FakeConnector>) -> MarketStreamManager {
    let mut config = test_config();
    config.reconnect.max_attempts = 0;
    MarketStreamManager::new(config, connector.as_connector())
}

async fn subscribe_candle(manager: &MarketStreamManager, recorder: &Recorder) -> SubscriptionKey {
    manager
        .subscribe(
            "btcusdt",
            StreamKind::Candle,
            Some("1m"),
            recorder.on_update(),
            recorder.on_state(),
        )
        .await
        .unwrap()
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn candle_updates_are_delivered_in_order() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;
    wait_until("connected", || recorder.last_state() == Some(Connected)).await;

    let handshake: serde_json::Value = serde_json::from_str(&server.sent()[0]).unwrap();
    assert_eq!(handshake["method"], "SUBSCRIBE");
    assert_eq!(handshake["params"][0], "btcusdt@kline_1m");

    let frames = [("100.50", false), ("101.25", false), ("100.75", true)];
    for (received, (close, closed)) in frames.into_iter().enumerate() {
        server.push(&kline_frame("BTCUSDT", 1_672_515_780_000, close, closed));
        wait_until("candle delivered", || recorder.events().len() == received + 1).await;
        assert_eq!(manager.get_state(&key), Connected);
    }

    let closes: Vec<(Decimal, bool)> = recorder
        .events()
        .into_iter()
        .map(|event| match event {
            MarketEvent::Candle(candle) => (candle.close, candle.is_closed),
            MarketEvent::Ticker(_) => panic!("unexpected ticker"),
        })
        .collect();
    assert_eq!(
        closes,
        vec![
            ("100.50".parse().unwrap(), false),
            ("101.25".parse().unwrap(), false),
            ("100.75".parse().unwrap(), true),
        ]
    );

    assert_eq!(recorder.states(), vec![Connecting, Connected]);
    assert_eq!(manager.get_state(&key), Connected);
    let status = manager.status(&key).unwrap();
    assert_eq!(status.messages_received, 3);
    assert!(status.last_message_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn many_frames_keep_receive_order() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;

    let start = 1_672_515_780_000_i64;
    for i in 0..200 {
        server.push(&kline_frame("BTCUSDT", start + i * 60_000, "100", false));
    }
    wait_until("all frames", || recorder.events().len() == 200).await;

    let open_times: Vec<i64> = recorder
        .events()
        .into_iter()
        .map(|event| match event {
            MarketEvent::Candle(candle) => candle.open_time.timestamp_millis(),
            MarketEvent::Ticker(_) => panic!("unexpected ticker"),
        })
        .collect();
    let expected: Vec<i64> = (0..200).map(|i| start + i * 60_000).collect();
    assert_eq!(open_times, expected);
}

#[tokio::test(start_paused = true)]
async fn ticker_inside_combined_envelope_is_delivered() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    manager
        .subscribe(
            "ETHUSDT",
            StreamKind::Ticker,
            None,
            recorder.on_update(),
            recorder.on_state(),
        )
        .await
        .unwrap();
    let server = connector.next_server().await;

    let frame = format!(
        r#"{{"stream":"ethusdt@ticker","data":{}}}"#,
        ticker_frame("ETHUSDT", "2512.34")
    );
    server.push(&frame);
    wait_until("ticker", || recorder.events().len() == 1).await;

    match &recorder.events()[0] {
        MarketEvent::Ticker(ticker) => {
            assert_eq!(ticker.symbol, "ETHUSDT");
            assert_eq!(ticker.last_price, "2512.34".parse::<Decimal>().unwrap());
            assert_eq!(ticker.change_pct, "-0.50".parse::<Decimal>().unwrap());
        }
        MarketEvent::Candle(_) => panic!("unexpected candle"),
    }
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_leave_connection_up() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;

    server.push("not json at all");
    server.push(r#"{"e":"depthUpdate","s":"BTCUSDT"}"#);
    server.push(r#"{"result":null,"id":1}"#);
    server.push(&kline_frame("BTCUSDT", 1_672_515_780_000, "100", false));
    wait_until("valid frame", || recorder.events().len() == 1).await;

    assert_eq!(recorder.states(), vec![Connecting, Connected]);
    assert_eq!(manager.get_state(&key), Connected);
    assert_eq!(manager.status(&key).unwrap().decode_errors, 2);
    assert_eq!(connector.log(), vec!["open:1"]);
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reconnects_after_remote_close() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    let first = connector.next_server().await;
    wait_until("connected", || recorder.last_state() == Some(Connected)).await;

    first.close();
    let second = connector.next_server().await;
    wait_until("reconnected", || recorder.count(Connected) == 2).await;

    assert_eq!(second.id, 2);
    assert_eq!(
        recorder.states(),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
    assert_eq!(manager.status(&key).unwrap().reconnect_attempt, 0);
    assert_eq!(connector.log(), vec!["open:1", "close:1", "open:2"]);
}

#[tokio::test(start_paused = true)]
async fn receive_error_triggers_reconnect() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    subscribe_candle(&manager, &recorder).await;
    let first = connector.next_server().await;

    first.fail();
    connector.next_server().await;
    wait_until("reconnected", || recorder.count(Connected) == 2).await;

    assert_eq!(connector.log(), vec!["open:1", "close:1", "open:2"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_subscription_triggers_reconnect() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    subscribe_candle(&manager, &recorder).await;
    let first = connector.next_server().await;

    first.push(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#);
    wait_until("reconnecting", || recorder.count(Reconnecting) == 1).await;

    assert_eq!(connector.log(), vec!["open:1", "close:1"]);
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_replaced() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    subscribe_candle(&manager, &recorder).await;
    let _silent = connector.next_server().await;
    wait_until("connected", || recorder.last_state() == Some(Connected)).await;
    let connected_at = Instant::now();

    wait_until("stale", || recorder.count(Reconnecting) == 1).await;
    let elapsed = connected_at.elapsed();

    // threshold 5s, checked every 1s
    assert!(elapsed >= Duration::from_secs(5), "stale after {elapsed:?}");
    assert!(
        elapsed <= Duration::from_secs(6) + Duration::from_millis(10),
        "stale after {elapsed:?}"
    );
    assert_eq!(connector.log(), vec!["open:1", "close:1"]);

    connector.next_server().await;
    wait_until("reconnected", || recorder.count(Connected) == 2).await;
}

#[tokio::test(start_paused = true)]
async fn steady_traffic_never_goes_stale() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;

    for i in 0..30 {
        server.push(&kline_frame("BTCUSDT", 1_672_515_780_000 + i, "100", false));
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    assert_eq!(recorder.count(Reconnecting), 0);
    assert_eq!(recorder.events().len(), 30);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    wait_until("failed", || recorder.last_state() == Some(Failed)).await;

    // initial attempt plus three retries
    assert_eq!(connector.connect_calls(), 4);
    assert_eq!(manager.get_state(&key), Failed);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connect_calls(), 4);
    assert_eq!(recorder.last_state(), Some(Failed));
    assert!(connector.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let started = Instant::now();
    subscribe_candle(&manager, &recorder).await;
    wait_until("failed", || recorder.last_state() == Some(Failed)).await;

    // 100ms + 200ms + 400ms of backoff before the fourth refusal
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn resubscribe_after_failure_starts_over() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    let manager = manager(&connector);
    let first = Recorder::new();

    let key = subscribe_candle(&manager, &first).await;
    wait_until("failed", || first.last_state() == Some(Failed)).await;

    connector.accept_all();
    let second = Recorder::new();
    subscribe_candle(&manager, &second).await;
    connector.next_server().await;
    wait_until("connected", || second.last_state() == Some(Connected)).await;

    assert_eq!(manager.get_state(&key), Connected);
    assert_eq!(first.last_state(), Some(Failed));
    assert_eq!(second.states(), vec![Connecting, Connected]);
}

#[tokio::test(start_paused = true)]
async fn attempt_counter_resets_once_connected() {
    let connector = FakeConnector::new();
    connector.refuse_next(2);
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;
    wait_until("connected", || recorder.last_state() == Some(Connected)).await;

    assert_eq!(connector.connect_calls(), 3);
    assert_eq!(manager.status(&key).unwrap().reconnect_attempt, 0);

    // a fresh outage starts again from the base delay
    let dropped = Instant::now();
    server.close();
    connector.next_server().await;
    let waited = dropped.elapsed();
    assert!(waited >= Duration::from_millis(100), "{waited:?}");
    assert!(waited < Duration::from_millis(200), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn reconnect_cap_serializes_retries_but_not_first_connects() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    connector.set_connect_delay(Duration::from_millis(300));

    let mut config = test_config();
    config.max_concurrent_reconnects = 1;
    let manager = MarketStreamManager::new(config, connector.as_connector());

    let btc = Recorder::new();
    let eth = Recorder::new();
    subscribe_candle(&manager, &btc).await;
    manager
        .subscribe(
            "ethusdt",
            StreamKind::Ticker,
            None,
            eth.on_update(),
            eth.on_state(),
        )
        .await
        .unwrap();

    wait_until("both failed", || {
        btc.last_state() == Some(Failed) && eth.last_state() == Some(Failed)
    })
    .await;

    // two first connects plus three retries per key
    let spans = connector.connect_spans();
    assert_eq!(spans.len(), 8);

    let (first_btc, first_eth) = (spans[0], spans[1]);
    assert!(
        first_eth.0 < first_btc.1,
        "first connects should run side by side: {first_btc:?} {first_eth:?}"
    );

    let mut retries = spans[2..].to_vec();
    retries.sort_by_key(|(started, _)| *started);
    for pair in retries.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        assert!(
            next.0 >= previous.1,
            "retries overlapped: {previous:?} and {next:?}"
        );
    }
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unsubscribe_cancels_pending_retry() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    let manager = unlimited_retries_manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    wait_until("reconnecting", || recorder.count(Reconnecting) == 1).await;

    assert!(manager.unsubscribe(&key).await);

    let states = recorder.states();
    let calls = connector.connect_calls();
    assert_eq!(states.last(), Some(&Disconnected));

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(recorder.states(), states);
    assert_eq!(connector.connect_calls(), calls);
    assert_eq!(manager.get_state(&key), Disconnected);
    assert!(manager.is_empty());
    assert!(!manager.unsubscribe(&key).await);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_closes_live_connection() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let key = subscribe_candle(&manager, &recorder).await;
    let server = connector.next_server().await;
    wait_until("connected", || recorder.last_state() == Some(Connected)).await;

    assert!(manager.unsubscribe(&key).await);
    assert_eq!(connector.log(), vec!["open:1", "close:1"]);
    assert_eq!(recorder.states(), vec![Connecting, Connected, Disconnected]);

    server.push(&kline_frame("BTCUSDT", 1_672_515_780_000, "100", false));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(recorder.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_subscribe_closes_before_reopening() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let first = Recorder::new();
    let second = Recorder::new();

    subscribe_candle(&manager, &first).await;
    connector.next_server().await;
    wait_until("connected", || first.last_state() == Some(Connected)).await;

    subscribe_candle(&manager, &second).await;
    connector.next_server().await;
    wait_until("second connected", || second.last_state() == Some(Connected)).await;

    assert_eq!(connector.log(), vec!["open:1", "close:1", "open:2"]);
    assert_eq!(first.states(), vec![Connecting, Connected, Disconnected]);
    assert_eq!(second.states(), vec![Connecting, Connected]);
    assert_eq!(manager.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_all_during_reconnect() {
    let connector = FakeConnector::new();
    connector.refuse_all();
    let manager = unlimited_retries_manager(&connector);
    let btc = Recorder::new();
    let eth = Recorder::new();

    subscribe_candle(&manager, &btc).await;
    manager
        .subscribe(
            "ETHUSDT",
            StreamKind::Ticker,
            None,
            eth.on_update(),
            eth.on_state(),
        )
        .await
        .unwrap();
    wait_until("both reconnecting", || {
        btc.count(Reconnecting) >= 1 && eth.count(Reconnecting) >= 1
    })
    .await;

    manager.close_all().await;

    assert_eq!(btc.last_state(), Some(Disconnected));
    assert_eq!(eth.last_state(), Some(Disconnected));
    assert!(manager.is_empty());

    let calls = connector.connect_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connect_calls(), calls);
}

// =============================================================================
// Programmer Errors
// =============================================================================

#[tokio::test]
async fn invalid_arguments_register_nothing() {
    let connector = FakeConnector::new();
    let manager = manager(&connector);
    let recorder = Recorder::new();

    let cases = [
        ("BTCUSDT", StreamKind::Candle, None, SubscribeError::MissingInterval),
        (
            "BTCUSDT",
            StreamKind::Ticker,
            Some("1m"),
            SubscribeError::UnexpectedInterval("1m".to_string()),
        ),
        (
            "BTCUSDT",
            StreamKind::Candle,
            Some("7m"),
            SubscribeError::InvalidInterval("7m".to_string()),
        ),
        (
            "",
            StreamKind::Ticker,
            None,
            SubscribeError::InvalidSymbol(String::new()),
        ),
    ];

    for (symbol, kind, interval, expected) in cases {
        let result = manager
            .subscribe(
                symbol,
                kind,
                interval,
                recorder.on_update(),
                recorder.on_state(),
            )
            .await;
        assert_eq!(result, Err(expected));
    }

    assert!(manager.is_empty());
    assert_eq!(connector.connect_calls(), 0);
    assert!(recorder.states().is_empty());
}
